//! Built-in step actions: shell commands, artifact publishing, exports

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::collaborators::shell::ShellCommand;
use crate::core::{StepAction, StepContext, StepError, StepOutput};

/// Runs a rendered command through the shell
#[derive(Debug, Clone)]
pub struct ShellStep {
    shell: String,
    command: String,
    /// Variable receiving trimmed stdout
    capture: Option<String>,
    timeout_secs: Option<u64>,
    workdir: Option<PathBuf>,
}

impl ShellStep {
    pub fn new(shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            command: command.into(),
            capture: None,
            timeout_secs: None,
            workdir: None,
        }
    }

    pub fn capture(mut self, variable: Option<String>) -> Self {
        self.capture = variable;
        self
    }

    pub fn timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }
}

#[async_trait]
impl StepAction for ShellStep {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let command = ctx.env.render(&self.command)?;
        let vars = ctx.env.resolve_all()?;
        info!("[{}] $ {}", ctx.stage, command);

        let output = ShellCommand::new(&self.shell, command)
            .with_workdir(self.workdir.clone())
            .with_timeout(self.timeout_secs)
            .run(&vars, &ctx.cancel)
            .await?;

        if !output.success() {
            return Err(StepError::CommandFailed {
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        if let Some(variable) = &self.capture {
            debug!("Capturing stdout into {}", variable);
            ctx.env.declare_literal(variable.clone(), output.stdout.trim())?;
        }

        Ok(StepOutput::new(output.stdout))
    }
}

/// Publishes a file produced by an earlier step
#[derive(Debug, Clone)]
pub struct PublishStep {
    path: String,
    pattern: String,
    /// Variable receiving the archived location
    export: Option<String>,
    workdir: Option<PathBuf>,
}

impl PublishStep {
    pub fn new(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pattern: pattern.into(),
            export: None,
            workdir: None,
        }
    }

    pub fn export(mut self, variable: Option<String>) -> Self {
        self.export = variable;
        self
    }

    pub fn workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }
}

#[async_trait]
impl StepAction for PublishStep {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let path = PathBuf::from(ctx.env.render(&self.path)?);
        let pattern = ctx.env.render(&self.pattern)?;
        let path = match &self.workdir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        };

        let artifact = Artifact::from_file(&path).await?;
        let published = ctx.artifacts.publish(&artifact, &pattern).await?;

        if let Some(variable) = &self.export {
            ctx.env
                .declare_literal(variable.clone(), published.location.clone())?;
        }

        Ok(StepOutput::new(format!(
            "Published {} ({} bytes) to {}",
            published.name, published.size, published.location
        )))
    }
}

/// Declares a context variable from a rendered template
#[derive(Debug, Clone)]
pub struct ExportStep {
    name: String,
    value: String,
}

impl ExportStep {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl StepAction for ExportStep {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let value = ctx.env.render(&self.value)?;
        ctx.env.declare_literal(self.name.clone(), value.clone())?;
        Ok(StepOutput::new(format!("{}={}", self.name, value)))
    }
}
