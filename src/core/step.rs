//! Step domain model
//!
//! A step is an opaque call into an external collaborator. The engine only
//! looks at whether it succeeded and at the text it produced.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::artifact::{ArtifactError, ArtifactPublisher};
use crate::core::cancel::CancelSignal;
use crate::core::context::{ContextError, EnvironmentContext};
use crate::core::report::FailureKind;

/// Error types for step execution
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("Failed to launch command: {0}")]
    Launch(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("{0}")]
    Failed(String),

    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    /// Classify the error for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::Context(err) => err.kind(),
            StepError::Artifact(err) => err.kind(),
            StepError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::StepFailure,
        }
    }
}

/// Successful step result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub output: String,
}

impl StepOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// Run-scoped services handed to every step
#[derive(Clone)]
pub struct StepContext {
    /// Name of the enclosing stage
    pub stage: String,
    pub env: Arc<EnvironmentContext>,
    pub artifacts: Arc<ArtifactPublisher>,
    pub cancel: CancelSignal,
}

/// Trait for step execution - build tools, deploy targets, scanners
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// A single named step in a stage
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub action: Arc<dyn StepAction>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
        }
    }

    pub fn from_arc(name: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}
