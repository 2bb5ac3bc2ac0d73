//! Test: Failure Handling - fail fast, continue on error, cancellation

use crate::helpers::*;
use stagerun::core::{
    cancel_pair, EnvironmentContext, FailureKind, Pipeline, PipelineRun, RunStatus, Stage,
    StageOutcome, Step,
};
use stagerun::execution::PostRunHooks;
use std::time::Duration;

fn three_stages(trace: &Trace, s2_continue: bool) -> Pipeline {
    Pipeline::new("s1-s2-s3")
        .stage(Stage::new("S1").step(Step::new("ok", MockStep::ok("s1", trace))))
        .stage(
            Stage::new("S2")
                .continue_on_error(s2_continue)
                .step(Step::new("tests", MockStep::failing("s2", trace, "3 tests failed")))
                .step(Step::new("after", MockStep::ok("s2-after", trace))),
        )
        .stage(Stage::new("S3").step(Step::new("deploy", MockStep::ok("s3", trace))))
}

/// S2 fails: the run stops, S3 never runs, failure hooks fire
#[tokio::test]
async fn test_failure_stops_remaining_stages() {
    let trace = Trace::default();
    let on_success = CountingHook::new("announce");
    let on_failure = CountingHook::new("page");
    let mut run = PipelineRun::new(three_stages(&trace, false), EnvironmentContext::new())
        .with_hooks(
            PostRunHooks::default()
                .on_success(on_success.clone())
                .on_failure(on_failure.clone()),
        );

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(
        outcomes(&report),
        vec![
            ("S1".to_string(), StageOutcome::Success),
            ("S2".to_string(), StageOutcome::Failure),
            ("S3".to_string(), StageOutcome::NotRun),
        ]
    );
    assert_eq!(trace.entries(), vec!["s1", "s2"]);

    let failure = report.first_failure.as_ref().unwrap();
    assert_eq!(failure.stage.as_deref(), Some("S2"));
    assert_eq!(failure.step.as_deref(), Some("tests"));
    assert_eq!(failure.kind, FailureKind::StepFailure);
    assert!(failure.message.contains("3 tests failed"));

    assert_eq!(on_success.count(), 0);
    assert_eq!(on_failure.count(), 1);
}

/// A continue-on-error stage records its failure and the run goes on
#[tokio::test]
async fn test_continue_on_error_keeps_going() {
    let trace = Trace::default();
    let mut run = PipelineRun::new(three_stages(&trace, true), EnvironmentContext::new());

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_stage(&report, "S2", StageOutcome::Failure);
    assert_stage(&report, "S3", StageOutcome::Success);
    assert_eq!(trace.entries(), vec!["s1", "s2", "s3"]);
    assert!(report.stage("S2").unwrap().failure.is_some());
}

/// Cancelling mid-stage aborts the run and leaves later stages unrun
#[tokio::test]
async fn test_cancel_aborts_run() {
    let trace = Trace::default();
    let pipeline = Pipeline::new("cancelled")
        .stage(Stage::new("Build").step(Step::new("build", MockStep::ok("build", &trace))))
        .stage(Stage::new("Soak").step(Step::new(
            "soak",
            MockStep::ok("soak", &trace).slow(Duration::from_secs(30)),
        )))
        .stage(Stage::new("Deploy").step(Step::new("deploy", MockStep::ok("deploy", &trace))));

    let on_failure = CountingHook::new("page");
    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new())
        .with_hooks(PostRunHooks::default().on_failure(on_failure.clone()));

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let started = std::time::Instant::now();
    let (report, _) = execute_run_with_cancel(&mut run, cancel).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(
        report.first_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Cancelled)
    );
    assert_stage(&report, "Build", StageOutcome::Success);
    assert_stage(&report, "Soak", StageOutcome::Failure);
    assert_stage(&report, "Deploy", StageOutcome::NotRun);
    assert_eq!(trace.entries(), vec!["build"]);
    assert_eq!(on_failure.count(), 1);
}

/// A failing step in a YAML pipeline reports its exit code and stderr
#[tokio::test]
async fn test_shell_failure_from_yaml() {
    let yaml = r#"
name: "shell-failure"
stages:
  - name: Compile
    steps:
      - run: "echo 'cannot find symbol' >&2; exit 3"
        name: javac
  - name: Package
    steps:
      - run: "echo never"
"#;
    let config = stagerun::core::config::PipelineConfig::from_yaml(yaml).unwrap();
    let mut run = config
        .to_run(&stagerun::collaborators::RunnerConfig::new(), &[])
        .unwrap();

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    let failure = report.first_failure.as_ref().unwrap();
    assert_eq!(failure.step.as_deref(), Some("javac"));
    assert!(failure.message.contains("code 3"));
    assert!(failure.message.contains("cannot find symbol"));
    assert_stage(&report, "Package", StageOutcome::NotRun);
}
