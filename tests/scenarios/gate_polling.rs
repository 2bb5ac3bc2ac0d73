//! Test: Gate Polling - approval, rejection, deadlines, cancellation

use crate::helpers::*;
use stagerun::core::{
    cancel_pair, EnvironmentContext, FailureKind, GateOutcome, Pipeline, PipelineRun, RunStatus,
    Stage, StageOutcome, Step,
};
use stagerun::execution::{ExecutionEvent, GateCheck, GateDecision};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn gated(trace: &Trace, check: GateCheck, source: Arc<ScriptedSource>) -> Pipeline {
    Pipeline::new("gated")
        .stage(
            Stage::new("Quality Gate")
                .step(Step::new("analyze", MockStep::ok("analyze", trace)))
                .with_gate(check, source),
        )
        .stage(Stage::new("Deploy").step(Step::new("deploy", MockStep::ok("deploy", trace))))
}

fn check(deadline_ms: u64, poll_ms: u64) -> GateCheck {
    GateCheck::new(
        Duration::from_millis(deadline_ms),
        Duration::from_millis(poll_ms),
    )
    .unwrap()
}

#[tokio::test]
async fn test_gate_approves_after_pending_polls() {
    let trace = Trace::default();
    let source = Arc::new(ScriptedSource::new(vec![
        GateDecision::Pending,
        GateDecision::Pending,
        GateDecision::Approved,
    ]));
    let mut run = PipelineRun::new(
        gated(&trace, check(2_000, 10), source.clone()),
        EnvironmentContext::new(),
    );

    let (report, events) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(source.calls(), 3);
    assert_eq!(
        report.stage("Quality Gate").unwrap().gate,
        Some(GateOutcome::Approved)
    );
    assert_eq!(trace.entries(), vec!["analyze", "deploy"]);
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::GateWaiting { stage } if stage == "Quality Gate")));
}

/// A silent source times out no later than deadline plus one poll interval
#[tokio::test]
async fn test_gate_timeout_aborts_within_bound() {
    let trace = Trace::default();
    let deadline = Duration::from_millis(300);
    let poll = Duration::from_millis(50);
    let mut run = PipelineRun::new(
        gated(&trace, check(300, 50), Arc::new(ScriptedSource::silent())),
        EnvironmentContext::new(),
    );

    let started = Instant::now();
    let (report, _) = execute_run(&mut run).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= deadline, "gave up early after {:?}", elapsed);
    assert!(
        elapsed < deadline + poll + Duration::from_millis(500),
        "waited too long: {:?}",
        elapsed
    );
    assert_eq!(report.status, RunStatus::Aborted);
    assert_stage(&report, "Quality Gate", StageOutcome::Failure);
    assert_stage(&report, "Deploy", StageOutcome::NotRun);
    assert_eq!(
        report.first_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::GateTimedOut)
    );
}

#[tokio::test]
async fn test_gate_rejection_aborts() {
    let trace = Trace::default();
    let source = Arc::new(ScriptedSource::new(vec![GateDecision::Rejected]));
    let on_failure = CountingHook::new("page");
    let mut run = PipelineRun::new(gated(&trace, check(1_000, 10), source), EnvironmentContext::new())
        .with_hooks(stagerun::execution::PostRunHooks::default().on_failure(on_failure.clone()));

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(
        report.stage("Quality Gate").unwrap().gate,
        Some(GateOutcome::Rejected)
    );
    assert_eq!(
        report.first_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::GateRejected)
    );
    assert_eq!(trace.entries(), vec!["analyze"]);
    assert_eq!(on_failure.count(), 1);
}

/// With abort-on-timeout off the timeout is only a warning
#[tokio::test]
async fn test_gate_timeout_tolerated_when_not_aborting() {
    let trace = Trace::default();
    let mut run = PipelineRun::new(
        gated(
            &trace,
            check(100, 20).with_abort_on_timeout(false),
            Arc::new(ScriptedSource::silent()),
        ),
        EnvironmentContext::new(),
    );

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(
        report.stage("Quality Gate").unwrap().gate,
        Some(GateOutcome::TimedOut)
    );
    assert_eq!(trace.entries(), vec!["analyze", "deploy"]);
}

/// Cancellation ends a long gate wait promptly
#[tokio::test]
async fn test_cancel_during_gate_wait() {
    let trace = Trace::default();
    let mut run = PipelineRun::new(
        gated(&trace, check(60_000, 1_000), Arc::new(ScriptedSource::silent())),
        EnvironmentContext::new(),
    );

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let (report, _) = execute_run_with_cancel(&mut run, cancel).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(
        report.stage("Quality Gate").unwrap().gate,
        Some(GateOutcome::Cancelled)
    );
    assert_eq!(
        report.first_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Cancelled)
    );
}

/// A gate whose stage steps fail is never polled
#[tokio::test]
async fn test_gate_skipped_when_steps_fail() {
    let trace = Trace::default();
    let source = Arc::new(ScriptedSource::new(vec![GateDecision::Approved]));
    let pipeline = Pipeline::new("broken-build").stage(
        Stage::new("Quality Gate")
            .step(Step::new("analyze", MockStep::failing("analyze", &trace, "scanner crashed")))
            .with_gate(check(1_000, 10), source.clone()),
    );
    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new());

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(source.calls(), 0);
    assert!(report.stage("Quality Gate").unwrap().gate.is_none());
}

/// A gate query naming an undeclared variable fails the stage without polling
#[tokio::test]
async fn test_unrenderable_gate_query_fails_fast() {
    use stagerun::collaborators::CommandDecisionSource;
    use stagerun::core::condition::ConditionPattern;

    let trace = Trace::default();
    let source = CommandDecisionSource::new(
        "sh",
        "echo {SONAR_TASK}",
        ConditionPattern::Simple("OK".to_string()),
    );
    let pipeline = Pipeline::new("sonar")
        .stage(
            Stage::new("Quality Gate")
                .step(Step::new("analyze", MockStep::ok("analyze", &trace)))
                .with_gate(check(300, 50), Arc::new(source)),
        )
        .stage(Stage::new("Deploy").step(Step::new("deploy", MockStep::ok("deploy", &trace))));
    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new());

    let started = Instant::now();
    let (report, events) = execute_run(&mut run).await;

    assert!(
        started.elapsed() < Duration::from_millis(300),
        "polled until the deadline: {:?}",
        started.elapsed()
    );
    assert_eq!(report.status, RunStatus::Failure);
    assert_stage(&report, "Quality Gate", StageOutcome::Failure);
    assert_stage(&report, "Deploy", StageOutcome::NotRun);
    assert!(report.stage("Quality Gate").unwrap().gate.is_none());
    let first = report.first_failure.as_ref().unwrap();
    assert_eq!(first.kind, FailureKind::UnresolvedReferenceError);
    assert_eq!(first.stage.as_deref(), Some("Quality Gate"));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::GateWaiting { .. })));
}
