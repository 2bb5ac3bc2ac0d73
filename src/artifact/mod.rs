//! Artifact publisher - fingerprints, validates and archives build outputs

pub mod store;

pub use store::{ArtifactStore, DirectoryStore, InMemoryStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::report::FailureKind;

/// Error types for artifact publishing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("Artifact '{name}' is empty")]
    Empty { name: String },

    #[error("Artifact '{name}' does not match expected pattern '{pattern}'")]
    PatternMismatch { name: String, pattern: String },

    #[error("Artifact '{name}' was already published with fingerprint {existing}, refusing {attempted}")]
    Duplicate {
        name: String,
        existing: String,
        attempted: String,
    },

    #[error("Artifact file not found: {0}")]
    Missing(PathBuf),

    #[error("Invalid artifact pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Artifact store error: {0}")]
    Store(String),
}

impl ArtifactError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ArtifactError::Empty { .. } => FailureKind::EmptyArtifactError,
            ArtifactError::PatternMismatch { .. } | ArtifactError::InvalidPattern { .. } => {
                FailureKind::PatternMismatchError
            }
            ArtifactError::Duplicate { .. } => FailureKind::DuplicateArtifactError,
            ArtifactError::Missing(_) => FailureKind::MissingArtifactError,
            ArtifactError::Store(_) => FailureKind::StepFailure,
        }
    }
}

/// Where an artifact's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactContent {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A candidate build output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the content
    pub fingerprint: String,
    pub content: ArtifactContent,
}

/// Hex-encoded SHA-256 digest
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl Artifact {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            fingerprint: fingerprint(&bytes),
            content: ArtifactContent::Bytes(bytes),
        }
    }

    /// Read and fingerprint a file; the artifact is named after the file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(ArtifactError::Store(format!("{}: {}", path.display(), e))),
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ArtifactError::Missing(path.to_path_buf()))?;

        Ok(Self {
            name,
            size: bytes.len() as u64,
            fingerprint: fingerprint(&bytes),
            content: ArtifactContent::File(path.to_path_buf()),
        })
    }
}

/// Handle to an artifact recorded in this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub name: String,
    pub size: u64,
    pub fingerprint: String,
    /// Store-specific location usable by later stages
    pub location: String,
    pub published_at: DateTime<Utc>,
}

/// Records published artifacts for a run and persists them through a store
pub struct ArtifactPublisher {
    store: Arc<dyn ArtifactStore>,
    published: Mutex<Vec<PublishedArtifact>>,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Validate and persist an artifact
    ///
    /// Re-publishing identical content under the same name returns the
    /// original handle without touching the store.
    pub async fn publish(
        &self,
        artifact: &Artifact,
        expected_pattern: &str,
    ) -> Result<PublishedArtifact, ArtifactError> {
        if artifact.size == 0 {
            return Err(ArtifactError::Empty {
                name: artifact.name.clone(),
            });
        }

        let pattern =
            glob::Pattern::new(expected_pattern).map_err(|e| ArtifactError::InvalidPattern {
                pattern: expected_pattern.to_string(),
                reason: e.to_string(),
            })?;
        if !pattern.matches(&artifact.name) {
            return Err(ArtifactError::PatternMismatch {
                name: artifact.name.clone(),
                pattern: expected_pattern.to_string(),
            });
        }

        let mut published = self.published.lock().await;
        if let Some(existing) = published.iter().find(|p| p.name == artifact.name) {
            if existing.fingerprint == artifact.fingerprint {
                debug!(
                    "Artifact {} already published with identical content",
                    artifact.name
                );
                return Ok(existing.clone());
            }
            return Err(ArtifactError::Duplicate {
                name: artifact.name.clone(),
                existing: existing.fingerprint.clone(),
                attempted: artifact.fingerprint.clone(),
            });
        }

        let location = self.store.persist(artifact).await?;
        let handle = PublishedArtifact {
            name: artifact.name.clone(),
            size: artifact.size,
            fingerprint: artifact.fingerprint.clone(),
            location,
            published_at: Utc::now(),
        };
        info!(
            "Published artifact {} ({} bytes, {}) to {}",
            handle.name,
            handle.size,
            &handle.fingerprint[..12.min(handle.fingerprint.len())],
            handle.location
        );
        published.push(handle.clone());
        Ok(handle)
    }

    /// All artifacts published so far, in publish order
    pub async fn published(&self) -> Vec<PublishedArtifact> {
        self.published.lock().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<PublishedArtifact> {
        self.published
            .lock()
            .await
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }
}
