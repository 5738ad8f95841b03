//! Checkpoint storage trait

use anyhow::Result;
use async_trait::async_trait;

use crate::CheckpointFile;

/// Trait for checkpoint storage operations.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint together with its human readable status text.
    async fn store_checkpoint(&self, file: &CheckpointFile, status_sql: &str) -> Result<()>;
}
