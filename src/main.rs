use anyhow::{Context, Result};
use stagerun::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use stagerun::cli::output::*;
use stagerun::cli::{Cli, Command};
use stagerun::core::config::PipelineConfig;
use stagerun::core::{cancel_pair, RunReport, RunStatus};
use stagerun::execution::{ExecutionEvent, PipelineExecutor};
use stagerun::persistence::{create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => {
            list_pipelines(cmd).await?;
            0
        }
        Command::History(cmd) => {
            show_history(cmd).await?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Exit code for a finished run
fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => 0,
        RunStatus::Failure | RunStatus::Running => 1,
        RunStatus::Aborted => 2,
    }
}

async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store: Arc<dyn PersistenceBackend> =
            Arc::new(stagerun::persistence::SqliteExecutionStore::with_default_path().await?);
        Ok(store)
    }
    #[cfg(not(feature = "sqlite"))]
    {
        warn!("Built without sqlite support; history is not kept between runs");
        let store: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());
        Ok(store)
    }
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<i32> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    for (key, value) in &cmd.var {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let mut run = config.to_run(&cmd.runner_config(), &cmd.var)?;

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    // Ctrl-C aborts the run; hooks still fire
    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            handle.cancel();
        }
    });

    // Set up event handler for console output
    let executor = PipelineExecutor::new().with_event_handler(move |event| match &event {
        ExecutionEvent::StepOutput { step, output, .. } => {
            if verbose {
                println!("{} {}:\n{}", INFO, style(step).dim(), format_output(output, 20));
            }
        }
        _ => println!("{}", format_execution_event(&event)),
    });

    println!();
    let report = executor.execute(&mut run, cancel).await;

    println!("\n{}", format_report(&report));

    record_run(&report, cmd, store.as_ref()).await;

    info!("{}", report.summary());
    Ok(exit_code(report.status))
}

/// Write the report file and history entry for a finished run
///
/// The exit code reflects the run, so failures here are only warnings.
async fn record_run(report: &RunReport, cmd: &RunCommand, store: &dyn PersistenceBackend) {
    if let Some(path) = &cmd.report {
        match write_report(report, path, cmd.json_lines) {
            Ok(()) => println!("{} Report written to {}", INFO, style(path.display()).dim()),
            Err(e) => warn!("Could not write report: {:#}", e),
        }
    }

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(report);
        match store.save_execution(&summary).await {
            Ok(()) => println!(
                "{} Run saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            ),
            Err(e) => warn!("Could not save run to history: {:#}", e),
        }
    }
}

fn write_report(report: &RunReport, path: &std::path::Path, json_lines: bool) -> Result<()> {
    let content = if json_lines {
        report.to_json_lines()?
    } else {
        serde_json::to_string_pretty(report)?
    };
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file)
        .and_then(|config| config.check_environment(&cmd.var).map(|count| (config, count)));

    match result {
        Ok((config, variables)) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Variables: {}", style(variables).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(1)
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    let mut json_data = Vec::new();
    if !cmd.json {
        println!("{} Pipelines in history:", INFO);
    }

    for pipeline_name in &pipelines {
        let executions = store.list_executions(pipeline_name).await?;
        let count = |status: RunStatus| executions.iter().filter(|e| e.status == status).count();

        if cmd.json {
            json_data.push(serde_json::json!({
                "name": pipeline_name,
                "execution_count": executions.len(),
                "succeeded": count(RunStatus::Success),
                "failed": count(RunStatus::Failure),
                "aborted": count(RunStatus::Aborted),
            }));
        } else if cmd.with_counts {
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} aborted)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(count(RunStatus::Success)).green(),
                style(count(RunStatus::Failure)).red(),
                style(count(RunStatus::Aborted)).magenta()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.verbose)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all_execs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_execs.extend(store.list_executions(&pipeline).await?);
            }
            all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_execs
        }
    };
    executions.truncate(cmd.limit);

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {}/{} succeeded",
        style(summary.stages_succeeded).cyan(),
        summary.stages_total
    );
    println!("  Artifacts: {}", style(summary.artifacts).cyan());
    if let Some(failure) = &summary.first_failure {
        println!(
            "  First failure: {} {}",
            style(format!("{:?}", failure.kind)).red(),
            failure.message
        );
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
