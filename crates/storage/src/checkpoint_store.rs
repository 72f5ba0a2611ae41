//! JSON checkpoint store.
//!
//! Stores the workflow checkpoint as a pretty JSON file in a workspace
//! directory, alongside a plain-text dump of the accumulated source for
//! human inspection.

use std::path::{Path, PathBuf};

use codeloom_core::WorkflowCheckpoint;
use tokio::fs;
use tracing::info;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No checkpoint exists at the given location
    #[error("no checkpoint found at {0}")]
    NotFound(PathBuf),
}

/// File-based checkpoint store rooted at a workspace directory.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Create a store. This creates the workspace directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    fn source_path(&self) -> PathBuf {
        self.root.join("functions.py")
    }

    /// Serialize the checkpoint to durable storage, replacing any prior
    /// snapshot. The accumulated source is dumped next to it.
    pub async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let json = serde_json::to_string_pretty(checkpoint)?;
        fs::write(self.checkpoint_path(), json.as_bytes()).await?;
        fs::write(
            self.source_path(),
            checkpoint.graph.accumulated_source().as_bytes(),
        )
        .await?;
        info!(
            stage = checkpoint.last_completed_stage.as_deref().unwrap_or("-"),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load the stored snapshot, fully replacing in-memory state.
    pub async fn load(&self) -> Result<WorkflowCheckpoint> {
        let path = self.checkpoint_path();
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&json)?)
    }

    /// Whether a checkpoint exists in this workspace.
    pub async fn exists(&self) -> bool {
        fs::try_exists(self.checkpoint_path()).await.unwrap_or(false)
    }
}
