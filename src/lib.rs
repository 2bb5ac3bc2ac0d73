//! stagerun - a stage-based CI pipeline runner with quality gates and post-run hooks

pub mod artifact;
pub mod cli;
pub mod collaborators;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactError, ArtifactPublisher, ArtifactStore, PublishedArtifact};
pub use core::config::PipelineConfig;
pub use core::{
    cancel_pair, CancelHandle, CancelSignal, ContextError, EnvironmentContext, Pipeline,
    PipelineRun, RunReport, RunStatus, Stage, Step, StepAction, StepContext, StepError,
};
pub use execution::{ExecutionEvent, GateCheck, PipelineExecutor, PostRunHook, PostRunHooks};
