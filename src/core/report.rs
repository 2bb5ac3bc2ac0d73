//! Run report - stage outcomes, artifacts and hooks for downstream tooling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::PublishedArtifact;
use crate::core::state::{GateOutcome, RunStatus, StageOutcome};

/// Error taxonomy entry recorded for failed stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    StepFailure,
    GateRejected,
    GateTimedOut,
    EmptyArtifactError,
    PatternMismatchError,
    DuplicateArtifactError,
    MissingArtifactError,
    UnresolvedReferenceError,
    CyclicReferenceError,
    ImmutableVariableError,
    Cancelled,
}

/// Where and why a run (or a continue-on-error stage) failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub stage: Option<String>,
    pub step: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// A step that was started within a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub succeeded: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-stage execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub index: usize,
    pub name: String,
    pub outcome: StageOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl StageRecord {
    pub fn not_run(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            outcome: StageOutcome::NotRun,
            started_at: None,
            finished_at: None,
            steps: Vec::new(),
            gate: None,
            failure: None,
        }
    }
}

/// Which hook set a post-run hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Success,
    Failure,
    Always,
}

/// Result of firing one post-run hook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRecord {
    pub phase: HookPhase,
    pub hook: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete, serializable outcome of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
    pub artifacts: Vec<PublishedArtifact>,
    pub hooks: Vec<HookRecord>,
    pub first_failure: Option<FailureInfo>,
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "lowercase")]
enum ReportLine<'a> {
    Stage {
        execution_id: Uuid,
        #[serde(flatten)]
        stage: &'a StageRecord,
    },
    Run {
        execution_id: Uuid,
        pipeline: &'a str,
        status: RunStatus,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        artifacts: &'a [PublishedArtifact],
        hooks: &'a [HookRecord],
        first_failure: &'a Option<FailureInfo>,
    },
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// One JSON object per stage followed by a single run record
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut lines = Vec::with_capacity(self.stages.len() + 1);
        for stage in &self.stages {
            lines.push(serde_json::to_string(&ReportLine::Stage {
                execution_id: self.execution_id,
                stage,
            })?);
        }
        lines.push(serde_json::to_string(&ReportLine::Run {
            execution_id: self.execution_id,
            pipeline: &self.pipeline,
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            artifacts: &self.artifacts,
            hooks: &self.hooks,
            first_failure: &self.first_failure,
        })?);
        Ok(lines.join("\n") + "\n")
    }

    /// Short human-readable summary line
    pub fn summary(&self) -> String {
        let succeeded = self
            .stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Success)
            .count();
        let mut summary = format!(
            "{} - {}/{} stages succeeded, {} artifact(s)",
            self.status,
            succeeded,
            self.stages.len(),
            self.artifacts.len()
        );
        if let Some(failure) = &self.first_failure {
            summary.push_str(&format!(
                " - first failure: {:?} in {}{}",
                failure.kind,
                failure.stage.as_deref().unwrap_or("<setup>"),
                failure
                    .step
                    .as_deref()
                    .map(|s| format!(" / {}", s))
                    .unwrap_or_default()
            ));
        }
        summary
    }
}
