//! Shell subprocess runner - calls `sh -c <command>` with the run's variables

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::{CancelSignal, StepError};
use crate::execution::HookError;

/// Error types for launching and supervising a shell command
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Failed to launch '{shell}': {reason}")]
    Launch { shell: String, reason: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error talking to subprocess: {0}")]
    Io(String),
}

impl From<ShellError> for StepError {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::Timeout(secs) => StepError::Timeout(secs),
            ShellError::Cancelled => StepError::Cancelled,
            other => StepError::Launch(other.to_string()),
        }
    }
}

impl From<ShellError> for HookError {
    fn from(err: ShellError) -> Self {
        HookError::Launch(err.to_string())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// A single shell invocation
#[derive(Debug, Clone)]
pub struct ShellCommand {
    shell: String,
    command: String,
    workdir: Option<PathBuf>,
    timeout_secs: Option<u64>,
    stdin: Option<String>,
}

impl ShellCommand {
    pub fn new(shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            command: command.into(),
            workdir: None,
            timeout_secs: None,
            stdin: None,
        }
    }

    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run the command with `vars` exported into its environment
    ///
    /// The child is killed if the timeout passes or `cancel` fires.
    pub async fn run(
        &self,
        vars: &BTreeMap<String, String>,
        cancel: &CancelSignal,
    ) -> Result<CommandOutput, ShellError> {
        debug!("Spawning {} -c {:?}", self.shell, self.command);

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&self.command)
            .envs(vars)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| ShellError::Launch {
            shell: self.shell.clone(),
            reason: e.to_string(),
        })?;

        // Fed from a task so a child that never reads stdin still hits the timeout
        if let (Some(input), Some(mut pipe)) = (self.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!("Child closed stdin early: {}", e);
                }
            });
        }

        let timeout_secs = self.timeout_secs;
        let limit = async move {
            match timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Cancelled: {}", self.command);
                return Err(ShellError::Cancelled);
            }
            _ = limit => {
                warn!("Timed out after {}s: {}", timeout_secs.unwrap_or_default(), self.command);
                return Err(ShellError::Timeout(timeout_secs.unwrap_or_default()));
            }
            output = child.wait_with_output() => {
                output.map_err(|e| ShellError::Io(e.to_string()))?
            }
        };

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            "Command exited with {} ({} bytes of output)",
            result.code,
            result.stdout.len()
        );
        Ok(result)
    }
}
