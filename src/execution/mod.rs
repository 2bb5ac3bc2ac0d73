//! Pipeline execution engine

pub mod engine;
pub mod gate;
pub mod post_run;

pub use engine::{preflight, EventHandler, ExecutionEvent, PipelineExecutor};
pub use gate::{DecisionSource, GateCheck, GateConfigError, GateDecision, GateQueryError};
pub use post_run::{HookError, PostRunDispatcher, PostRunHook, PostRunHooks};
