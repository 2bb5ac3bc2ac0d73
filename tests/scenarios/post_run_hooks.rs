//! Test: Post-run Hooks - fired exactly once, never alter the status

use crate::helpers::*;
use stagerun::collaborators::RunnerConfig;
use stagerun::core::config::PipelineConfig;
use stagerun::core::{
    EnvironmentContext, FailureKind, HookPhase, Pipeline, PipelineRun, RunStatus, Stage,
    StageOutcome, Step,
};
use stagerun::execution::{PipelineExecutor, PostRunHooks};

fn hooks(success: &CountingHook, failure: &CountingHook, always: &CountingHook) -> PostRunHooks {
    PostRunHooks::default()
        .on_success(success.clone())
        .on_failure(failure.clone())
        .always(always.clone())
}

/// Failing hooks are recorded but the run stays successful
#[tokio::test]
async fn test_hook_errors_do_not_change_status() {
    let trace = Trace::default();
    let success = CountingHook::failing("announce");
    let failure = CountingHook::new("page");
    let always = CountingHook::failing("cleanup");
    let pipeline =
        Pipeline::new("noisy").stage(Stage::new("Build").step(Step::new("b", MockStep::ok("b", &trace))));
    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new())
        .with_hooks(hooks(&success, &failure, &always));

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.hooks.len(), 2);
    assert!(report.hooks.iter().all(|h| !h.succeeded));
    assert_eq!(report.hooks[0].phase, HookPhase::Success);
    assert_eq!(report.hooks[1].phase, HookPhase::Always);
    assert_eq!((success.count(), failure.count(), always.count()), (1, 0, 1));
}

/// An unresolvable context fails before any stage but still fires hooks
#[tokio::test]
async fn test_fatal_context_still_dispatches_once() {
    let trace = Trace::default();
    let success = CountingHook::new("announce");
    let failure = CountingHook::new("page");
    let always = CountingHook::new("cleanup");
    let env = EnvironmentContext::from_declarations([("ARTIFACT", "{APP_NAME}.jar")]).unwrap();
    let pipeline = Pipeline::new("broken-env")
        .stage(Stage::new("Build").step(Step::new("b", MockStep::ok("b", &trace))))
        .stage(Stage::new("Deploy").step(Step::new("d", MockStep::ok("d", &trace))));
    let mut run = PipelineRun::new(pipeline, env).with_hooks(hooks(&success, &failure, &always));

    let executor = PipelineExecutor::new();
    let report = executor.execute(&mut run, stagerun::core::CancelSignal::never()).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert!(trace.entries().is_empty());
    assert_stage(&report, "Build", StageOutcome::NotRun);
    assert_stage(&report, "Deploy", StageOutcome::NotRun);
    let first = report.first_failure.as_ref().unwrap();
    assert_eq!(first.kind, FailureKind::UnresolvedReferenceError);
    assert!(first.stage.is_none());
    assert_eq!((success.count(), failure.count(), always.count()), (0, 1, 1));

    // Executing a finished run again must not re-fire anything
    let again = executor.execute(&mut run, stagerun::core::CancelSignal::never()).await;
    assert_eq!(again.status, RunStatus::Failure);
    assert_eq!((success.count(), failure.count(), always.count()), (0, 1, 1));
    assert_eq!(again.hooks.len(), 2);
}

/// YAML hooks: a failure `run:` hook sees the run variables
#[tokio::test]
async fn test_yaml_hooks_receive_run_variables() {
    let outbox = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
name: "hooks"
stages:
  - name: Build
    steps:
      - run: "exit 1"
post:
  success:
    - run: "echo success >> {out}/log"
  failure:
    - run: "echo $PIPELINE $RUN_STATUS $FAILED_STAGE >> {out}/log"
      name: rollback
  always:
    - run: "echo always >> {out}/log"
"#,
        out = outbox.path().display()
    );

    let mut run = PipelineConfig::from_yaml(&yaml)
        .unwrap()
        .to_run(&RunnerConfig::new(), &[])
        .unwrap();
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.hooks.iter().all(|h| h.succeeded), "{:?}", report.hooks);
    let log = std::fs::read_to_string(outbox.path().join("log")).unwrap();
    assert_eq!(log, "hooks FAILURE Build\nalways\n");
}

/// The cleanup hook wipes the workspace after the run
#[tokio::test]
async fn test_cleanup_hook_wipes_workspace() {
    let root = tempfile::tempdir().unwrap();
    let workspace = root.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();
    let yaml = r#"
name: "cleanup"
stages:
  - name: Build
    steps:
      - run: "mkdir -p target && echo jar > target/app.jar"
post:
  always:
    - cleanup: true
"#;

    let runner = RunnerConfig::new().with_workspace_dir(&workspace);
    let mut run = PipelineConfig::from_yaml(yaml)
        .unwrap()
        .to_run(&runner, &[])
        .unwrap();
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.hooks.len(), 1);
    assert_eq!(report.hooks[0].hook, "cleanup");
    assert!(!workspace.exists());
}

struct PanickingHook;

#[async_trait::async_trait]
impl stagerun::execution::PostRunHook for PanickingHook {
    fn name(&self) -> &str {
        "broken-mailer"
    }

    async fn fire(
        &self,
        _report: &stagerun::core::RunReport,
        _env: &EnvironmentContext,
    ) -> Result<(), stagerun::execution::HookError> {
        panic!("notifier bug");
    }
}

/// A panicking failure hook is recorded and cleanup still runs once
#[tokio::test]
async fn test_cleanup_survives_panicking_hook() {
    let trace = Trace::default();
    let always = CountingHook::new("cleanup");
    let pipeline = Pipeline::new("panicky").stage(
        Stage::new("Build").step(Step::new("b", MockStep::failing("b", &trace, "boom"))),
    );
    let mut run = PipelineRun::new(pipeline, EnvironmentContext::new()).with_hooks(
        PostRunHooks::default()
            .on_failure(PanickingHook)
            .always(always.clone()),
    );

    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(always.count(), 1);
    assert_eq!(report.hooks.len(), 2);
    assert!(!report.hooks[0].succeeded);
    assert!(report.hooks[1].succeeded);
}
