//! Pipeline definition from YAML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{ArtifactStore, DirectoryStore, InMemoryStore};
use crate::collaborators::{
    CleanupHook, CommandDecisionSource, CommandNotifier, DirectoryWorkspace, ExportStep,
    LogNotifier, Notifier, NotifyHook, PublishStep, RunnerConfig, ShellHook, ShellStep,
};
use crate::core::condition::ConditionPattern;
use crate::core::context::{references, EnvironmentContext};
use crate::core::{Pipeline, PipelineRun, Stage, Step};
use crate::execution::{GateCheck, PostRunHook, PostRunHooks};

const DEFAULT_SUBJECT: &str = "{PIPELINE}: {RUN_STATUS}";
const DEFAULT_BODY: &str = "{RUN_SUMMARY}";

/// Variable definition - a literal/template or a value read from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableDefinition {
    /// Literal or `{NAME}` template
    Value(String),
    /// Trimmed contents of a file, taken verbatim
    File { path: String },
}

/// Top-level pipeline definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Variables visible to every stage, in declaration order
    #[serde(default)]
    pub environment: Mapping,

    /// Default glob for `publish` steps without their own pattern
    #[serde(default)]
    pub artifact_pattern: Option<String>,

    /// Stages, run in order
    pub stages: Vec<StageConfig>,

    /// Post-run hooks
    #[serde(default)]
    pub post: PostConfig,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// External decision checked after the steps succeed
    #[serde(default)]
    pub gate: Option<GateConfig>,

    #[serde(default)]
    pub continue_on_error: bool,

    /// Run this stage's steps concurrently
    #[serde(default)]
    pub parallel: bool,
}

/// One step: `run`, `publish` or `export`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepConfig {
    Run {
        run: String,
        #[serde(default)]
        name: Option<String>,
        /// Variable receiving trimmed stdout
        #[serde(default)]
        capture: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Publish {
        publish: String,
        #[serde(default)]
        name: Option<String>,
        /// Overrides the pipeline's `artifact_pattern`
        #[serde(default)]
        pattern: Option<String>,
        /// Variable receiving the archived location
        #[serde(default)]
        export: Option<String>,
    },
    Export {
        export: String,
        value: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl StepConfig {
    /// Display name; defaults to the command, path or variable
    pub fn display_name(&self) -> String {
        match self {
            StepConfig::Run { run, name, .. } => name.clone().unwrap_or_else(|| run.clone()),
            StepConfig::Publish { publish, name, .. } => name
                .clone()
                .unwrap_or_else(|| format!("publish {}", publish)),
            StepConfig::Export { export, name, .. } => name
                .clone()
                .unwrap_or_else(|| format!("export {}", export)),
        }
    }
}

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Command printing the current decision
    pub query: String,

    /// Pattern that signals approval
    pub approve: String,

    /// Pattern that signals rejection
    #[serde(default)]
    pub reject: Option<String>,

    /// Whether to use regex pattern matching
    #[serde(default)]
    pub use_regex: bool,

    /// Deadline for a decision
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Limit for a single query command
    #[serde(default)]
    pub query_timeout_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub abort_on_timeout: bool,

    #[serde(default = "default_true")]
    pub abort_on_reject: bool,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Hook sets fired after the run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostConfig {
    #[serde(default)]
    pub success: Vec<HookConfig>,

    /// Fired for failed and aborted runs
    #[serde(default)]
    pub failure: Vec<HookConfig>,

    #[serde(default)]
    pub always: Vec<HookConfig>,
}

/// One post-run hook: `notify`, `run` or `cleanup`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookConfig {
    Notify {
        /// Recipients; templates allowed
        notify: Vec<String>,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        body: Option<String>,
    },
    Run {
        run: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Cleanup {
        cleanup: bool,
    },
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name must not be empty");
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                anyhow::bail!("Stage names must not be empty");
            }
            if !seen.insert(stage.name.as_str()) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
            if stage.steps.is_empty() && stage.gate.is_none() {
                anyhow::bail!("Stage '{}' has no steps and no gate", stage.name);
            }

            for step in &stage.steps {
                if let StepConfig::Publish { pattern, .. } = step {
                    let pattern = pattern
                        .as_ref()
                        .or(self.artifact_pattern.as_ref())
                        .with_context(|| {
                            format!(
                                "Stage '{}' publishes an artifact but no pattern is set",
                                stage.name
                            )
                        })?;
                    // Templated patterns are checked when rendered
                    if references(pattern).is_empty() {
                        glob::Pattern::new(pattern).with_context(|| {
                            format!("Stage '{}' has invalid artifact pattern", stage.name)
                        })?;
                    }
                }
            }

            if let Some(gate) = &stage.gate {
                self.validate_gate(&stage.name, gate)?;
            }
        }

        for (name, definition) in self.variables()? {
            if let VariableDefinition::File { path } = definition {
                if !Path::new(&path).exists() {
                    anyhow::bail!(
                        "Variable '{}' references file that doesn't exist: {}",
                        name,
                        path
                    );
                }
            }
        }

        Ok(())
    }

    fn validate_gate(&self, stage: &str, gate: &GateConfig) -> Result<()> {
        GateCheck::new(
            Duration::from_secs(gate.timeout_secs),
            Duration::from_secs(gate.poll_interval_secs),
        )
        .with_context(|| format!("Stage '{}' has an invalid gate", stage))?;

        ConditionPattern::new(&gate.approve, gate.use_regex)
            .with_context(|| format!("Stage '{}' has an invalid approve pattern", stage))?;
        if let Some(reject) = &gate.reject {
            ConditionPattern::new(reject, gate.use_regex)
                .with_context(|| format!("Stage '{}' has an invalid reject pattern", stage))?;
        }
        Ok(())
    }

    /// Environment entries parsed into definitions, in declaration order
    pub fn variables(&self) -> Result<Vec<(String, VariableDefinition)>> {
        let mut vars = Vec::with_capacity(self.environment.len());

        for (key, value) in &self.environment {
            let name = scalar_to_string(key)
                .with_context(|| format!("Invalid environment key: {:?}", key))?;
            let definition = match value {
                Value::Mapping(map) => {
                    let path = map
                        .get("file")
                        .and_then(|v| v.as_str())
                        .with_context(|| {
                            format!("Variable '{}' must be a scalar or {{ file: <path> }}", name)
                        })?;
                    VariableDefinition::File {
                        path: path.to_string(),
                    }
                }
                other => VariableDefinition::Value(
                    scalar_to_string(other)
                        .with_context(|| format!("Variable '{}' has an unsupported value", name))?,
                ),
            };
            vars.push((name, definition));
        }

        Ok(vars)
    }

    /// Build the environment context, applying `overrides` last
    ///
    /// References are not resolved here; an unresolvable context fails the
    /// run before its first stage.
    pub fn build_environment(&self, overrides: &[(String, String)]) -> Result<EnvironmentContext> {
        let env = EnvironmentContext::new();
        for (name, definition) in self.variables()? {
            match definition {
                VariableDefinition::Value(value) => env.declare(name, value)?,
                VariableDefinition::File { path } => {
                    let content = std::fs::read_to_string(&path).with_context(|| {
                        format!("Failed to read variable '{}' from {}", name, path)
                    })?;
                    env.declare_literal(name, content.trim())?;
                }
            }
        }
        for (name, value) in overrides {
            env.declare(name.clone(), value.clone())?;
        }
        Ok(env)
    }

    /// Check that every variable resolves, with `overrides` applied
    pub fn check_environment(&self, overrides: &[(String, String)]) -> Result<usize> {
        let env = self.build_environment(overrides)?;
        let values = env.resolve_all()?;
        Ok(values.len())
    }

    /// Convert config to a runnable pipeline wired to `runner`'s collaborators
    pub fn to_run(&self, runner: &RunnerConfig, overrides: &[(String, String)]) -> Result<PipelineRun> {
        let env = self.build_environment(overrides)?;

        let mut pipeline = Pipeline::new(&self.name);
        for stage_config in &self.stages {
            pipeline = pipeline.stage(self.build_stage(stage_config, runner)?);
        }
        pipeline.validate()?;

        let store: Arc<dyn ArtifactStore> = match &runner.archive_dir {
            Some(dir) => Arc::new(DirectoryStore::new(dir)),
            None => Arc::new(InMemoryStore::new()),
        };

        Ok(PipelineRun::new(pipeline, env)
            .with_store(store)
            .with_hooks(self.build_hooks(runner)?))
    }

    fn build_stage(&self, config: &StageConfig, runner: &RunnerConfig) -> Result<Stage> {
        let mut stage = Stage::new(&config.name)
            .continue_on_error(config.continue_on_error)
            .parallel(config.parallel);

        for step in &config.steps {
            let name = step.display_name();
            stage = match step {
                StepConfig::Run {
                    run,
                    capture,
                    timeout_secs,
                    ..
                } => stage.step(Step::new(
                    name,
                    ShellStep::new(&runner.shell, run)
                        .capture(capture.clone())
                        .timeout(*timeout_secs)
                        .workdir(runner.workspace_dir.clone()),
                )),
                StepConfig::Publish {
                    publish,
                    pattern,
                    export,
                    ..
                } => {
                    let pattern = pattern
                        .clone()
                        .or_else(|| self.artifact_pattern.clone())
                        .with_context(|| {
                            format!("Stage '{}' publishes without a pattern", config.name)
                        })?;
                    stage.step(Step::new(
                        name,
                        PublishStep::new(publish, pattern)
                            .export(export.clone())
                            .workdir(runner.workspace_dir.clone()),
                    ))
                }
                StepConfig::Export { export, value, .. } => {
                    stage.step(Step::new(name, ExportStep::new(export, value)))
                }
            };
        }

        if let Some(gate) = &config.gate {
            let check = GateCheck::new(
                Duration::from_secs(gate.timeout_secs),
                Duration::from_secs(gate.poll_interval_secs),
            )?
            .with_abort_on_timeout(gate.abort_on_timeout)
            .with_abort_on_reject(gate.abort_on_reject);

            let approve = ConditionPattern::new(&gate.approve, gate.use_regex)?;
            let reject = gate
                .reject
                .as_deref()
                .map(|p| ConditionPattern::new(p, gate.use_regex))
                .transpose()?;
            let source = CommandDecisionSource::new(&runner.shell, &gate.query, approve)
                .reject_on(reject)
                .timeout(gate.query_timeout_secs);

            stage = stage.with_gate(check, Arc::new(source));
        }

        Ok(stage)
    }

    fn build_hooks(&self, runner: &RunnerConfig) -> Result<PostRunHooks> {
        let notifier: Arc<dyn Notifier> = match &runner.notify_command {
            Some(command) => Arc::new(
                CommandNotifier::new(&runner.shell, command)
                    .timeout(Some(runner.notify_timeout_secs)),
            ),
            None => Arc::new(LogNotifier),
        };

        let build = |hooks: &[HookConfig], phase: &str| -> Result<Vec<Arc<dyn PostRunHook>>> {
            let mut built: Vec<Arc<dyn PostRunHook>> = Vec::with_capacity(hooks.len());
            for (position, hook) in hooks.iter().enumerate() {
                match hook {
                    HookConfig::Notify {
                        notify,
                        subject,
                        body,
                    } => built.push(Arc::new(NotifyHook::new(
                        format!("{}-notify-{}", phase, position + 1),
                        notifier.clone(),
                        notify.clone(),
                        subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
                        body.as_deref().unwrap_or(DEFAULT_BODY),
                    ))),
                    HookConfig::Run {
                        run,
                        name,
                        timeout_secs,
                    } => built.push(Arc::new(
                        ShellHook::new(
                            name.clone().unwrap_or_else(|| run.clone()),
                            &runner.shell,
                            run,
                        )
                        .timeout(*timeout_secs),
                    )),
                    HookConfig::Cleanup { cleanup: false } => {}
                    HookConfig::Cleanup { cleanup: true } => {
                        let dir: &PathBuf = runner.workspace_dir.as_ref().with_context(|| {
                            format!("{} cleanup hook needs a workspace directory", phase)
                        })?;
                        built.push(Arc::new(CleanupHook::new(Arc::new(
                            DirectoryWorkspace::new(dir),
                        ))));
                    }
                }
            }
            Ok(built)
        };

        Ok(PostRunHooks {
            on_success: build(&self.post.success, "success")?,
            on_failure: build(&self.post.failure, "failure")?,
            always: build(&self.post.always, "always")?,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
