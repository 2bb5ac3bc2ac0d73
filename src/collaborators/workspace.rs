//! Workspace cleanup

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::{EnvironmentContext, RunReport};
use crate::execution::{HookError, PostRunHook};

/// A scratch area that can be wiped after a run
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn clean(&self) -> Result<(), HookError>;
}

/// Removes a directory tree; a missing directory is already clean
#[derive(Debug, Clone)]
pub struct DirectoryWorkspace {
    root: PathBuf,
}

impl DirectoryWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Workspace for DirectoryWorkspace {
    async fn clean(&self) -> Result<(), HookError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!("Cleaned workspace {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Workspace {} already absent", self.root.display());
                Ok(())
            }
            Err(e) => Err(HookError::Failed(format!(
                "Failed to clean {}: {}",
                self.root.display(),
                e
            ))),
        }
    }
}

/// Post-run hook wiping the workspace
pub struct CleanupHook {
    workspace: Arc<dyn Workspace>,
}

impl CleanupHook {
    pub fn new(workspace: Arc<dyn Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl PostRunHook for CleanupHook {
    fn name(&self) -> &str {
        "cleanup"
    }

    async fn fire(&self, _report: &RunReport, _env: &EnvironmentContext) -> Result<(), HookError> {
        self.workspace.clean().await
    }
}
