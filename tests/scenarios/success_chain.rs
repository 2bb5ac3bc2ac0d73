//! Test: Success Chain - stages run strictly in order

use crate::helpers::*;
use stagerun::collaborators::RunnerConfig;
use stagerun::core::config::PipelineConfig;
use stagerun::core::{EnvironmentContext, Pipeline, PipelineRun, RunStatus, Stage, StageOutcome, Step};
use stagerun::execution::{ExecutionEvent, PostRunHooks};

/// Every stage succeeds, in declaration order, and the success hooks fire
#[tokio::test]
async fn test_success_chain() {
    let trace = Trace::default();
    let pipeline = Pipeline::new("shop")
        .stage(Stage::new("Build").step(Step::new("compile", MockStep::ok("compile", &trace))))
        .stage(
            Stage::new("Test")
                .step(Step::new("unit", MockStep::ok("unit", &trace)))
                .step(Step::new("integration", MockStep::ok("integration", &trace))),
        )
        .stage(Stage::new("Package").step(Step::new("jar", MockStep::ok("jar", &trace))));

    let on_success = CountingHook::new("announce");
    let on_failure = CountingHook::new("page");
    let always = CountingHook::new("cleanup");
    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new()).with_hooks(
        PostRunHooks::default()
            .on_success(on_success.clone())
            .on_failure(on_failure.clone())
            .always(always.clone()),
    );

    let (report, events) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(trace.entries(), vec!["compile", "unit", "integration", "jar"]);
    for stage in ["Build", "Test", "Package"] {
        assert_stage(&report, stage, StageOutcome::Success);
    }
    assert!(report.first_failure.is_none());
    assert_eq!(report.stage("Test").unwrap().steps.len(), 2);

    assert_eq!(on_success.count(), 1);
    assert_eq!(on_failure.count(), 0);
    assert_eq!(always.count(), 1);
    assert_eq!(report.hooks.len(), 2);

    let started: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StageStarted { stage, .. } => Some(stage.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["Build", "Test", "Package"]);
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::HookFired { .. })
    ));
}

/// A YAML pipeline with real shell steps runs end to end
#[tokio::test]
async fn test_success_chain_from_yaml() {
    let yaml = r#"
name: "yaml-chain"
environment:
  GREETING: hello
stages:
  - name: Build
    steps:
      - run: "echo {GREETING} > build.txt"
  - name: Verify
    steps:
      - run: "cat build.txt"
        capture: BUILD_OUTPUT
"#;
    let workspace = tempfile::tempdir().unwrap();
    let runner = RunnerConfig::new().with_workspace_dir(workspace.path());

    let config = PipelineConfig::from_yaml(yaml).unwrap();
    let mut run = config.to_run(&runner, &[]).unwrap();
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success, "{}", report.summary());
    assert_eq!(run.env.resolve("BUILD_OUTPUT").unwrap(), "hello");
    assert_eq!(
        report.stage("Verify").unwrap().steps[0].output.trim(),
        "hello"
    );
}

/// Parallel steps all run and the stage waits for every one
#[tokio::test]
async fn test_parallel_stage_waits_for_all_steps() {
    let trace = Trace::default();
    let pipeline = Pipeline::new("fan-out")
        .stage(
            Stage::new("Checks")
                .parallel(true)
                .step(Step::new(
                    "lint",
                    MockStep::ok("lint", &trace).slow(std::time::Duration::from_millis(30)),
                ))
                .step(Step::new("audit", MockStep::ok("audit", &trace))),
        )
        .stage(Stage::new("Ship").step(Step::new("ship", MockStep::ok("ship", &trace))));

    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new());
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    let entries = trace.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.last().map(String::as_str), Some("ship"));
    assert_eq!(report.stage("Checks").unwrap().steps.len(), 2);
}
