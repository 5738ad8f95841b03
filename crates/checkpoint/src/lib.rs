//! Replication position checkpoints for chunk-dump
//!
//! A dump taken under a consistent snapshot records where the server's
//! binary log (or a replica's applied position) stood at that instant, so
//! the restored copy can be attached as a replica later.
//!
//! # Architecture
//!
//! - The `Checkpoint` trait is implemented by each position type
//! - `CheckpointFile` wraps a checkpoint for storage-agnostic serialization
//! - `CheckpointStore` abstracts where checkpoints are written
//! - `FilesystemStore` writes `<role>-data.sql` (human readable, replayable
//!   as comments) next to `<role>-data.json` (machine readable)

mod file;
mod filesystem;
mod role;
pub mod store;


pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use role::ReplicationRole;
pub use store::CheckpointStore;

/// Trait that replication position types must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct LogPosition {
///     pub file: String,
///     pub position: u64,
/// }
///
/// impl Checkpoint for LogPosition {
///     const DATABASE_TYPE: &'static str = "example";
///
///     fn to_cli_string(&self) -> String {
///         format!("{}:{}", self.file, self.position)
///     }
///
///     fn to_status_sql(&self) -> String {
///         format!("-- Log: {} at {}\n", self.file, self.position)
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Checkpoint type identifier (e.g., "mysql-binlog").
    ///
    /// Stored in serialized files and checked when loading them back.
    const DATABASE_TYPE: &'static str;

    /// One-line form for log output, e.g. `binlog.000042:157`.
    fn to_cli_string(&self) -> String;

    /// Status file content. Every line must be a SQL comment so the file can
    /// be fed to the `mysql` client alongside the data files.
    fn to_status_sql(&self) -> String;
}

/// Wrap `checkpoint` for `role` and hand it to `store`.
pub async fn emit_checkpoint<C: Checkpoint>(
    store: &dyn CheckpointStore,
    checkpoint: &C,
    role: ReplicationRole,
) -> anyhow::Result<CheckpointFile> {
    let file = CheckpointFile::new(checkpoint, role)?;
    store
        .store_checkpoint(&file, &checkpoint.to_status_sql())
        .await?;
    tracing::info!("Recorded {} position: {}", file.role(), file.position);
    Ok(file)
}
