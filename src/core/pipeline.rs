//! Pipeline definition and the per-invocation run aggregate

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::artifact::{ArtifactPublisher, ArtifactStore, InMemoryStore};
use crate::core::{
    context::EnvironmentContext,
    report::{HookRecord, RunReport, StageRecord},
    stage::Stage,
    state::{RunState, RunStatus},
};
use crate::execution::post_run::{PostRunDispatcher, PostRunHooks};

/// An ordered list of stages
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage, assigning the next position index
    pub fn stage(mut self, mut stage: Stage) -> Self {
        stage.index = self.stages.len();
        self.stages.push(stage);
        self
    }

    /// Check structural invariants of hand-built pipelines
    pub fn validate(&self) -> Result<()> {
        for pair in self.stages.windows(2) {
            if pair[1].index <= pair[0].index {
                anyhow::bail!(
                    "Stage '{}' (index {}) does not follow '{}' (index {})",
                    pair[1].name,
                    pair[1].index,
                    pair[0].name,
                    pair[0].index
                );
            }
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                warn!("Stage name '{}' is used more than once", stage.name);
            }
        }
        Ok(())
    }
}

/// Everything belonging to a single pipeline invocation
pub struct PipelineRun {
    pub pipeline: Pipeline,
    pub env: Arc<EnvironmentContext>,
    pub artifacts: Arc<ArtifactPublisher>,
    pub hooks: PostRunHooks,
    pub dispatcher: PostRunDispatcher,
    pub state: RunState,
    /// One record per stage, in position order
    pub records: Vec<StageRecord>,
    pub hook_records: Vec<HookRecord>,
}

impl PipelineRun {
    pub fn new(pipeline: Pipeline, env: EnvironmentContext) -> Self {
        let records = pipeline
            .stages
            .iter()
            .map(|s| StageRecord::not_run(s.index, &s.name))
            .collect();

        Self {
            pipeline,
            env: Arc::new(env),
            artifacts: Arc::new(ArtifactPublisher::new(Arc::new(InMemoryStore::new()))),
            hooks: PostRunHooks::default(),
            dispatcher: PostRunDispatcher::new(),
            state: RunState::new(),
            records,
            hook_records: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Arc::new(ArtifactPublisher::new(store));
        self
    }

    pub fn with_hooks(mut self, hooks: PostRunHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn record(&self, stage_name: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.name == stage_name)
    }

    /// Snapshot the run as a report
    pub async fn report(&self) -> RunReport {
        RunReport {
            execution_id: self.state.execution_id,
            pipeline: self.pipeline.name.clone(),
            status: self.state.status(),
            started_at: self.state.started_at,
            finished_at: self.state.finished_at,
            stages: self.records.clone(),
            artifacts: self.artifacts.published().await,
            hooks: self.hook_records.clone(),
            first_failure: self.state.first_failure.clone(),
        }
    }
}
