//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::report::FailureInfo;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Stages are still executing
    Running,
    /// Every stage completed without a blocking failure
    Success,
    /// A step failed
    Failure,
    /// A gate rejected or timed out, or the run was cancelled
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
            RunStatus::Aborted => "ABORTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunStatus::Running),
            "SUCCESS" => Some(RunStatus::Success),
            "FAILURE" => Some(RunStatus::Failure),
            "ABORTED" => Some(RunStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutcome {
    NotRun,
    Running,
    Success,
    Failure,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageOutcome::NotRun => "NOT_RUN",
            StageOutcome::Running => "RUNNING",
            StageOutcome::Success => "SUCCESS",
            StageOutcome::Failure => "FAILURE",
        };
        f.write_str(label)
    }
}

/// Result of waiting on a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateOutcome {
    Approved,
    Rejected,
    TimedOut,
    /// The wait was cancelled before a decision arrived
    Cancelled,
}

/// Mutable run-level state; the status is terminal once set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID
    pub execution_id: Uuid,

    status: RunStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// First blocking failure, for FAILURE / ABORTED runs
    pub first_failure: Option<FailureInfo>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            first_failure: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Move to a terminal status; returns false if already terminal
    fn finish(&mut self, status: RunStatus, failure: Option<FailureInfo>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        if self.first_failure.is_none() {
            self.first_failure = failure;
        }
        true
    }

    pub fn succeed(&mut self) -> bool {
        self.finish(RunStatus::Success, None)
    }

    pub fn fail(&mut self, failure: FailureInfo) -> bool {
        self.finish(RunStatus::Failure, Some(failure))
    }

    pub fn abort(&mut self, failure: FailureInfo) -> bool {
        self.finish(RunStatus::Aborted, Some(failure))
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
