//! Built-in collaborators: shell steps, gate queries, notifications, cleanup

pub mod decision;
pub mod notify;
pub mod shell;
pub mod steps;
pub mod workspace;

use std::path::PathBuf;

pub use decision::CommandDecisionSource;
pub use notify::{CommandNotifier, LogNotifier, Notification, Notifier, NotifyHook, ShellHook};
pub use shell::{CommandOutput, ShellCommand, ShellError};
pub use steps::{ExportStep, PublishStep, ShellStep};
pub use workspace::{CleanupHook, DirectoryWorkspace, Workspace};

/// Settings for the collaborators a pipeline definition is wired to
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shell used for `sh -c` style invocations
    pub shell: String,

    /// Where published artifacts are archived; in memory when unset
    pub archive_dir: Option<PathBuf>,

    /// Working directory for steps and the target of cleanup hooks
    pub workspace_dir: Option<PathBuf>,

    /// Command receiving notifications on stdin; logged when unset
    pub notify_command: Option<String>,

    /// Seconds before a stuck notification command is killed
    pub notify_timeout_secs: u64,
}

pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 60;

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            archive_dir: None,
            workspace_dir: None,
            notify_command: None,
            notify_timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    pub fn with_notify_command(mut self, command: impl Into<String>) -> Self {
        self.notify_command = Some(command.into());
        self
    }

    pub fn with_notify_timeout(mut self, timeout_secs: u64) -> Self {
        self.notify_timeout_secs = timeout_secs;
        self
    }
}
