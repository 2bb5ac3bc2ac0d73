//! Artifact stores - where published outputs are persisted

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use crate::artifact::{Artifact, ArtifactContent, ArtifactError};

/// Trait for artifact storage backends
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist the artifact and return its location
    async fn persist(&self, artifact: &Artifact) -> Result<String, ArtifactError>;
}

/// Archives artifacts by copying them into a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for DirectoryStore {
    async fn persist(&self, artifact: &Artifact) -> Result<String, ArtifactError> {
        let store_err = |e: std::io::Error| ArtifactError::Store(e.to_string());

        tokio::fs::create_dir_all(&self.root).await.map_err(store_err)?;
        let target = self.root.join(&artifact.name);

        match &artifact.content {
            ArtifactContent::File(source) => {
                tokio::fs::copy(source, &target).await.map_err(store_err)?;
            }
            ArtifactContent::Bytes(bytes) => {
                tokio::fs::write(&target, bytes).await.map_err(store_err)?;
            }
        }

        debug!("Archived {} to {}", artifact.name, target.display());
        Ok(target.to_string_lossy().into_owned())
    }
}

/// In-memory store (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names persisted so far, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn persist(&self, artifact: &Artifact) -> Result<String, ArtifactError> {
        let location = format!("memory://{}", artifact.name);
        self.entries
            .write()
            .await
            .insert(artifact.name.clone(), artifact.fingerprint.clone());
        Ok(location)
    }
}
