//! Test: Variable Substitution - templates resolved through the environment context

use crate::helpers::*;
use stagerun::collaborators::RunnerConfig;
use stagerun::core::config::PipelineConfig;
use stagerun::core::{FailureKind, RunStatus, StageOutcome};

const BUILD_AND_SHIP: &str = r#"
name: "my-application"
environment:
  APP_NAME: my-application
  BUILD_NUMBER: "1"
  ARTIFACT: "{APP_NAME}-{BUILD_NUMBER}.jar"
artifact_pattern: "{APP_NAME}-*.jar"
stages:
  - name: Build
    steps:
      - run: "mkdir -p target && echo built > target/{ARTIFACT}"
      - run: "echo $ARTIFACT"
        capture: BUILT
  - name: Archive
    steps:
      - publish: "target/{ARTIFACT}"
        export: ARCHIVED_AT
      - export: RELEASE_NOTE
        value: "{BUILT} archived at {ARCHIVED_AT}"
"#;

/// Overrides win over file values and flow into every template
#[tokio::test]
async fn test_artifact_name_from_templates() {
    let workspace = tempfile::tempdir().unwrap();
    let runner = RunnerConfig::new().with_workspace_dir(workspace.path());
    let overrides = vec![("BUILD_NUMBER".to_string(), "42".to_string())];

    let mut run = PipelineConfig::from_yaml(BUILD_AND_SHIP)
        .unwrap()
        .to_run(&runner, &overrides)
        .unwrap();
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Success, "{}", report.summary());
    assert!(workspace.path().join("target/my-application-42.jar").exists());
    assert_eq!(run.env.resolve("BUILT").unwrap(), "my-application-42.jar");
    assert_eq!(report.artifacts[0].name, "my-application-42.jar");
    assert_eq!(
        run.env.resolve("RELEASE_NOTE").unwrap(),
        "my-application-42.jar archived at memory://my-application-42.jar"
    );
}

#[tokio::test]
async fn test_cyclic_environment_fails_before_any_stage() {
    let yaml = r#"
name: "cyclic"
environment:
  A: "{B}"
  B: "{A}"
stages:
  - name: Build
    steps:
      - run: "echo never"
"#;
    let config = PipelineConfig::from_yaml(yaml).unwrap();
    assert!(config.check_environment(&[]).is_err());

    let mut run = config.to_run(&RunnerConfig::new(), &[]).unwrap();
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert_stage(&report, "Build", StageOutcome::NotRun);
    assert_eq!(
        report.first_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::CyclicReferenceError)
    );
}

/// Variables read during the run cannot be redefined by later steps
#[tokio::test]
async fn test_redeclaring_a_read_variable_fails_the_step() {
    let yaml = r#"
name: "immutable"
environment:
  VERSION: "1.0"
stages:
  - name: Build
    steps:
      - run: "echo {VERSION}"
  - name: Bump
    steps:
      - export: VERSION
        value: "2.0"
"#;
    let mut run = PipelineConfig::from_yaml(yaml)
        .unwrap()
        .to_run(&RunnerConfig::new(), &[])
        .unwrap();
    let (report, _) = execute_run(&mut run).await;

    assert_eq!(report.status, RunStatus::Failure);
    assert_stage(&report, "Build", StageOutcome::Success);
    assert_stage(&report, "Bump", StageOutcome::Failure);
    assert_eq!(
        report.first_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::ImmutableVariableError)
    );
    assert_eq!(run.env.resolve("VERSION").unwrap(), "1.0");
}
