//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

use crate::collaborators::{RunnerConfig, DEFAULT_NOTIFY_TIMEOUT_SECS};

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Variable overrides (key=value), applied after the file's environment
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write the report as JSON lines instead of a single document
    #[arg(long)]
    pub json_lines: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Archive published artifacts into this directory
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Working directory for steps, wiped by `cleanup` hooks
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Command that receives notification bodies on stdin
    #[arg(long)]
    pub notify_command: Option<String>,

    /// Seconds before the notification command is killed
    #[arg(long, default_value_t = DEFAULT_NOTIFY_TIMEOUT_SECS)]
    pub notify_timeout: u64,

    /// Shell used to run commands
    #[arg(long, default_value = "sh")]
    pub shell: String,
}

impl RunCommand {
    /// Collaborator settings selected on the command line
    pub fn runner_config(&self) -> RunnerConfig {
        let mut runner = RunnerConfig::new()
            .with_shell(&self.shell)
            .with_notify_timeout(self.notify_timeout);
        if let Some(dir) = &self.archive_dir {
            runner = runner.with_archive_dir(dir);
        }
        if let Some(dir) = &self.workspace {
            runner = runner.with_workspace_dir(dir);
        }
        if let Some(command) = &self.notify_command {
            runner = runner.with_notify_command(command);
        }
        runner
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Variable overrides used when resolving the environment
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts per status
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
