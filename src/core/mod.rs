//! Core domain models for a pipeline run
//!
//! This module defines the environment context, stages, steps, run state
//! and the report produced at the end of a run.

pub mod cancel;
pub mod condition;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod report;
pub mod stage;
pub mod state;
pub mod step;

pub use cancel::*;
pub use context::*;
pub use pipeline::*;
pub use report::*;
pub use stage::*;
pub use state::*;
pub use step::*;
