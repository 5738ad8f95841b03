//! Filesystem-based checkpoint storage implementation.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use crate::store::CheckpointStore;
use crate::CheckpointFile;

/// Filesystem implementation of CheckpointStore trait.
///
/// Writes `<role>-data.sql` and `<role>-data.json` into a directory,
/// overwriting any previous files for the same role.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, file: &CheckpointFile, status_sql: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let sql_path = self.dir.join(file.role.sql_file_name());
        std::fs::write(&sql_path, status_sql)?;

        let json_path = self.dir.join(file.role.json_file_name());
        std::fs::write(&json_path, serde_json::to_string_pretty(file)?)?;

        tracing::debug!(
            "Stored {} checkpoint to {} and {}",
            file.role,
            sql_path.display(),
            json_path.display()
        );
        Ok(())
    }
}
