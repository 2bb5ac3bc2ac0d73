//! Main execution engine - drives a pipeline run stage by stage

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{
    CancelSignal, EnvironmentContext, FailureInfo, FailureKind, GateOutcome, HookPhase,
    PipelineRun, RunReport, RunStatus, Stage, StageOutcome, StageRecord, Step, StepContext,
    StepError, StepOutput, StepRecord,
};

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: Uuid,
        pipeline: String,
    },
    StageStarted {
        index: usize,
        stage: String,
    },
    StepStarted {
        stage: String,
        step: String,
    },
    StepOutput {
        stage: String,
        step: String,
        output: String,
    },
    StepFailed {
        stage: String,
        step: String,
        error: String,
    },
    GateWaiting {
        stage: String,
    },
    GateFinished {
        stage: String,
        outcome: GateOutcome,
    },
    StageFinished {
        stage: String,
        outcome: StageOutcome,
    },
    StageSkipped {
        stage: String,
    },
    RunFinished {
        execution_id: Uuid,
        status: RunStatus,
    },
    HookFired {
        hook: String,
        phase: HookPhase,
        succeeded: bool,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// How a stage ended, from the run's point of view
enum StageVerdict {
    Passed,
    /// Failed in a continue-on-error stage; the run goes on
    Tolerated,
    Failed(FailureInfo),
    Aborted(FailureInfo),
}

/// Runs stages strictly in order and owns the run's status transitions
#[derive(Default)]
pub struct PipelineExecutor {
    event_handlers: Vec<EventHandler>,
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.add_event_handler(handler);
        self
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run every stage, then fire the post-run hooks and return the report
    pub async fn execute(&self, run: &mut PipelineRun, cancel: CancelSignal) -> RunReport {
        self.run(run, cancel).await;

        let report = run.report().await;
        let records = run.dispatcher.dispatch(&run.hooks, &report, &run.env).await;
        for record in &records {
            self.emit_event(ExecutionEvent::HookFired {
                hook: record.hook.clone(),
                phase: record.phase,
                succeeded: record.succeeded,
            });
        }
        run.hook_records.extend(records);

        run.report().await
    }

    /// Run every stage until the pipeline finishes, fails or is aborted
    pub async fn run(&self, run: &mut PipelineRun, cancel: CancelSignal) -> RunStatus {
        if run.status().is_terminal() {
            warn!(
                "Run {} already finished with {}",
                run.state.execution_id,
                run.status()
            );
            return run.status();
        }

        let execution_id = run.state.execution_id;
        info!(
            "Starting pipeline run: {} ({})",
            run.pipeline.name, execution_id
        );
        self.emit_event(ExecutionEvent::RunStarted {
            execution_id,
            pipeline: run.pipeline.name.clone(),
        });

        // Resolve everything up front so a broken context stops the run
        // before any stage has side effects
        if let Err(failure) = preflight(&run.env) {
            error!("Environment context failed to resolve: {}", failure.message);
            run.state.fail(failure);
            return self.finish(run, 0);
        }

        let stage_count = run.pipeline.stages.len();
        let mut position = 0;
        while position < stage_count {
            let stage = run.pipeline.stages[position].clone();

            if cancel.is_cancelled() {
                info!("Run cancelled before stage {}", stage.name);
                run.state.abort(FailureInfo {
                    stage: Some(stage.name.clone()),
                    step: None,
                    kind: FailureKind::Cancelled,
                    message: "Run cancelled".to_string(),
                });
                break;
            }

            let ctx = StepContext {
                stage: stage.name.clone(),
                env: run.env.clone(),
                artifacts: run.artifacts.clone(),
                cancel: cancel.clone(),
            };
            let verdict = self
                .run_stage(&stage, &mut run.records[position], ctx)
                .await;
            position += 1;

            match verdict {
                StageVerdict::Passed | StageVerdict::Tolerated => {}
                StageVerdict::Failed(failure) => {
                    run.state.fail(failure);
                    break;
                }
                StageVerdict::Aborted(failure) => {
                    run.state.abort(failure);
                    break;
                }
            }
        }

        if !run.status().is_terminal() {
            run.state.succeed();
        }
        self.finish(run, position)
    }

    fn finish(&self, run: &PipelineRun, first_unrun: usize) -> RunStatus {
        for record in &run.records[first_unrun.min(run.records.len())..] {
            debug!("Stage {} not run", record.name);
            self.emit_event(ExecutionEvent::StageSkipped {
                stage: record.name.clone(),
            });
        }

        let status = run.status();
        info!("Pipeline run finished: {} - {}", run.pipeline.name, status);
        self.emit_event(ExecutionEvent::RunFinished {
            execution_id: run.state.execution_id,
            status,
        });
        status
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        record: &mut StageRecord,
        ctx: StepContext,
    ) -> StageVerdict {
        info!("Stage {} ({}) started", stage.index, stage.name);
        record.outcome = StageOutcome::Running;
        record.started_at = Some(Utc::now());
        self.emit_event(ExecutionEvent::StageStarted {
            index: stage.index,
            stage: stage.name.clone(),
        });

        let (steps, failed) = if stage.parallel {
            self.run_steps_parallel(stage, &ctx).await
        } else {
            self.run_steps_sequential(stage, &ctx).await
        };
        record.steps = steps;

        if let Some((step, err)) = failed {
            let failure = FailureInfo {
                stage: Some(stage.name.clone()),
                step,
                kind: err.kind(),
                message: err.to_string(),
            };
            self.close_stage(record, StageOutcome::Failure, Some(failure.clone()));

            if failure.kind == FailureKind::Cancelled {
                return StageVerdict::Aborted(failure);
            }
            if stage.continue_on_error {
                warn!(
                    "Stage {} failed but continues on error: {}",
                    stage.name, failure.message
                );
                return StageVerdict::Tolerated;
            }
            error!("Stage {} failed: {}", stage.name, failure.message);
            return StageVerdict::Failed(failure);
        }

        if let Some(gate) = &stage.gate {
            if let Err(err) = gate.source.prepare(&ctx.env) {
                let failure = FailureInfo {
                    stage: Some(stage.name.clone()),
                    step: None,
                    kind: err.kind(),
                    message: format!("Gate query cannot be rendered: {}", err),
                };
                error!("Stage {} failed: {}", stage.name, failure.message);
                self.close_stage(record, StageOutcome::Failure, Some(failure.clone()));
                return StageVerdict::Failed(failure);
            }

            self.emit_event(ExecutionEvent::GateWaiting {
                stage: stage.name.clone(),
            });
            let outcome = gate
                .check
                .wait(gate.source.as_ref(), &ctx.env, &ctx.cancel)
                .await;
            record.gate = Some(outcome);
            self.emit_event(ExecutionEvent::GateFinished {
                stage: stage.name.clone(),
                outcome,
            });

            if outcome != GateOutcome::Approved {
                if gate.check.aborts_on(outcome) {
                    let (kind, message) = match outcome {
                        GateOutcome::Rejected => (FailureKind::GateRejected, "Gate rejected"),
                        GateOutcome::TimedOut => (
                            FailureKind::GateTimedOut,
                            "Gate deadline passed without a decision",
                        ),
                        _ => (FailureKind::Cancelled, "Run cancelled during gate wait"),
                    };
                    let failure = FailureInfo {
                        stage: Some(stage.name.clone()),
                        step: None,
                        kind,
                        message: message.to_string(),
                    };
                    error!("Stage {} aborted: {}", stage.name, message);
                    self.close_stage(record, StageOutcome::Failure, Some(failure.clone()));
                    return StageVerdict::Aborted(failure);
                }
                warn!(
                    "Gate for stage {} ended {:?}; continuing by policy",
                    stage.name, outcome
                );
            }
        }

        self.close_stage(record, StageOutcome::Success, None);
        info!("Stage {} succeeded", stage.name);
        StageVerdict::Passed
    }

    fn close_stage(
        &self,
        record: &mut StageRecord,
        outcome: StageOutcome,
        failure: Option<FailureInfo>,
    ) {
        record.outcome = outcome;
        record.failure = failure;
        record.finished_at = Some(Utc::now());
        self.emit_event(ExecutionEvent::StageFinished {
            stage: record.name.clone(),
            outcome,
        });
    }

    async fn run_steps_sequential(
        &self,
        stage: &Stage,
        ctx: &StepContext,
    ) -> (Vec<StepRecord>, Option<(Option<String>, StepError)>) {
        let mut records = Vec::with_capacity(stage.steps.len());

        for step in &stage.steps {
            if ctx.cancel.is_cancelled() {
                return (records, Some((Some(step.name.clone()), StepError::Cancelled)));
            }

            self.emit_event(ExecutionEvent::StepStarted {
                stage: stage.name.clone(),
                step: step.name.clone(),
            });
            let result = run_step(step, ctx).await;
            records.push(self.record_step(&stage.name, &step.name, result.as_ref()));
            if let Err(err) = result {
                return (records, Some((Some(step.name.clone()), err)));
            }
        }

        (records, None)
    }

    /// Run all steps concurrently; the first failure cancels the siblings
    async fn run_steps_parallel(
        &self,
        stage: &Stage,
        ctx: &StepContext,
    ) -> (Vec<StepRecord>, Option<(Option<String>, StepError)>) {
        let mut set = JoinSet::new();
        for (position, step) in stage.steps.iter().enumerate() {
            self.emit_event(ExecutionEvent::StepStarted {
                stage: stage.name.clone(),
                step: step.name.clone(),
            });
            let step = step.clone();
            let ctx = ctx.clone();
            set.spawn(async move { (position, run_step(&step, &ctx).await) });
        }

        let mut finished: Vec<Option<StepRecord>> = vec![None; stage.steps.len()];
        let mut failed = None;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, result)) => {
                    let name = &stage.steps[position].name;
                    finished[position] = Some(self.record_step(&stage.name, name, result.as_ref()));
                    if let Err(err) = result {
                        if failed.is_none() {
                            failed = Some((Some(name.clone()), err));
                            set.abort_all();
                        }
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if failed.is_none() {
                        failed = Some((None, StepError::Failed(format!("Step task panicked: {}", e))));
                        set.abort_all();
                    }
                }
            }
        }

        (finished.into_iter().flatten().collect(), failed)
    }

    fn record_step(
        &self,
        stage: &str,
        step: &str,
        result: Result<&StepOutput, &StepError>,
    ) -> StepRecord {
        match result {
            Ok(out) => {
                debug!("Step {}/{} succeeded", stage, step);
                self.emit_event(ExecutionEvent::StepOutput {
                    stage: stage.to_string(),
                    step: step.to_string(),
                    output: out.output.clone(),
                });
                StepRecord {
                    name: step.to_string(),
                    succeeded: true,
                    output: out.output.clone(),
                    error: None,
                }
            }
            Err(err) => {
                warn!("Step {}/{} failed: {}", stage, step, err);
                self.emit_event(ExecutionEvent::StepFailed {
                    stage: stage.to_string(),
                    step: step.to_string(),
                    error: err.to_string(),
                });
                StepRecord {
                    name: step.to_string(),
                    succeeded: false,
                    output: String::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

/// Run one step, racing it against cancellation
async fn run_step(step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
        result = step.action.run(ctx) => result,
    }
}

/// Resolve every variable, returning how many were declared
pub fn preflight(env: &EnvironmentContext) -> Result<usize, FailureInfo> {
    env.resolve_all().map(|vars| vars.len()).map_err(|e| FailureInfo {
        stage: None,
        step: None,
        kind: e.kind(),
        message: e.to_string(),
    })
}
