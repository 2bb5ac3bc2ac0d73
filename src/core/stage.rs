//! Stage domain model

use std::fmt;
use std::sync::Arc;

use crate::core::step::Step;
use crate::execution::gate::{DecisionSource, GateCheck};

/// Gate attached to a stage: bounds plus the source of the external decision
#[derive(Clone)]
pub struct StageGate {
    pub check: GateCheck,
    pub source: Arc<dyn DecisionSource>,
}

impl fmt::Debug for StageGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageGate").field("check", &self.check).finish()
    }
}

/// A named, ordered unit of pipeline work
#[derive(Debug, Clone)]
pub struct Stage {
    /// Position in the pipeline; assigned by `Pipeline::stage`
    pub index: usize,

    pub name: String,

    pub steps: Vec<Step>,

    /// Checked after the stage's steps succeed
    pub gate: Option<StageGate>,

    /// A failure is recorded but does not stop the run
    pub continue_on_error: bool,

    /// Run this stage's steps concurrently
    pub parallel: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            index: 0,
            name: name.into(),
            steps: Vec::new(),
            gate: None,
            continue_on_error: false,
            parallel: false,
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_gate(mut self, check: GateCheck, source: Arc<dyn DecisionSource>) -> Self {
        self.gate = Some(StageGate { check, source });
        self
    }

    pub fn continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }
}
