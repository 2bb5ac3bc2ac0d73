//! Test utility functions for stagerun scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use stagerun::core::{
    CancelSignal, EnvironmentContext, PipelineRun, RunReport, StageOutcome, StepAction,
    StepContext, StepError, StepOutput,
};
use stagerun::execution::{
    DecisionSource, ExecutionEvent, GateDecision, GateQueryError, HookError, PipelineExecutor,
    PostRunHook,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared log of step names in the order they ran
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Step that records itself and succeeds or fails as told
pub struct MockStep {
    label: String,
    trace: Trace,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl MockStep {
    pub fn ok(label: &str, trace: &Trace) -> Self {
        Self {
            label: label.to_string(),
            trace: trace.clone(),
            fail_with: None,
            delay: None,
        }
    }

    pub fn failing(label: &str, trace: &Trace, message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::ok(label, trace)
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl StepAction for MockStep {
    async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.trace.push(&self.label);
        match &self.fail_with {
            Some(message) => Err(StepError::Failed(message.clone())),
            None => Ok(StepOutput::new(format!("{} done", self.label))),
        }
    }
}

/// Decision source replaying a fixed script, then repeating its last answer
pub struct ScriptedSource {
    script: Vec<GateDecision>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<GateDecision>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    /// A source that never decides
    pub fn silent() -> Self {
        Self::new(vec![GateDecision::Pending])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionSource for ScriptedSource {
    async fn query(&self, _env: &EnvironmentContext) -> Result<GateDecision, GateQueryError> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .get(idx)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(GateDecision::Pending))
    }
}

/// Hook counting how often it fired, optionally failing every time
#[derive(Clone)]
pub struct CountingHook {
    name: String,
    fired: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingHook {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fired: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostRunHook for CountingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fire(&self, _report: &RunReport, _env: &EnvironmentContext) -> Result<(), HookError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HookError::Failed(format!("{} exploded", self.name)));
        }
        Ok(())
    }
}

/// Execute a run to completion, collecting every emitted event
pub async fn execute_run(run: &mut PipelineRun) -> (RunReport, Vec<ExecutionEvent>) {
    execute_run_with_cancel(run, CancelSignal::never()).await
}

pub async fn execute_run_with_cancel(
    run: &mut PipelineRun,
    cancel: CancelSignal,
) -> (RunReport, Vec<ExecutionEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let executor = PipelineExecutor::new().with_event_handler(move |event| {
        sink.lock().unwrap().push(event);
    });

    let report = executor.execute(run, cancel).await;
    let events = events.lock().unwrap().clone();
    (report, events)
}

/// Stage outcomes in pipeline order
pub fn outcomes(report: &RunReport) -> Vec<(String, StageOutcome)> {
    report
        .stages
        .iter()
        .map(|s| (s.name.clone(), s.outcome))
        .collect()
}

/// Assert a stage ended with the given outcome
pub fn assert_stage(report: &RunReport, stage: &str, expected: StageOutcome) {
    let record = report
        .stage(stage)
        .unwrap_or_else(|| panic!("Stage '{}' not found in report", stage));
    assert_eq!(
        record.outcome, expected,
        "Stage '{}' ended {:?}, expected {:?}\n{}",
        stage, record.outcome, expected,
        report.summary()
    );
}
