//! Parallel, consistent, chunked export of MySQL tables into SQL files.
//!
//! Each table is cut into primary/unique key ranges by a planner task,
//! the ranges flow through a bounded queue, and a pool of workers, each
//! holding a read-only transaction opened at the same logical instant,
//! turns them into `INSERT` statements.

pub mod chunk;
pub mod connector;
pub mod consistency;
mod dump;
pub mod error;
pub mod manager;
pub mod output;
pub mod progress;
pub mod replication;
pub mod schema;
pub mod table;
pub mod task;
pub mod testing;
pub mod worker;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use chunk::{ChunkBounds, DataChunk};
pub use connector::{
    ConnectionOptions, Connector, ControlConnection, MySqlConnector, RowSink, SnapshotSession,
};
pub use dump::run_dump;
pub use error::{DumpError, Result};
pub use manager::{DumpSummary, TableSummary, TaskManager};
pub use replication::{BinlogPosition, ReplicaPosition};
pub use schema::{TableRef, TableSelection};
pub use table::Table;
pub use task::{BoundaryQuery, ChunkSink, KeyProbe, Task};

/// What to do with a table that has no usable chunking key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablesWithoutKeyPolicy {
    /// Fail the run.
    Error,
    /// Export the whole table as one chunk.
    SingleChunk,
}

impl FromStr for TablesWithoutKeyPolicy {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(Self::Error),
            "single-chunk" => Ok(Self::SingleChunk),
            other => Err(DumpError::Config(format!(
                "'{other}' is not a valid option for tables without a unique key (expected 'error' or 'single-chunk')"
            ))),
        }
    }
}

/// How tables are locked while worker snapshots are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    /// `LOCK TABLES ... READ` on the exported tables only.
    PerTable,
    /// `FLUSH TABLES WITH READ LOCK`.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    RepeatableRead,
    ReadCommitted,
    ReadUncommitted,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
        }
    }

    /// Whether a transaction at this level keeps one snapshot for its
    /// whole lifetime.
    pub fn keeps_snapshot(&self) -> bool {
        matches!(
            self,
            IsolationLevel::Serializable | IsolationLevel::RepeatableRead
        )
    }
}

impl FromStr for IsolationLevel {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "SERIALIZABLE" => Ok(Self::Serializable),
            "REPEATABLE READ" => Ok(Self::RepeatableRead),
            "READ COMMITTED" => Ok(Self::ReadCommitted),
            "READ UNCOMMITTED" => Ok(Self::ReadUncommitted),
            _ => Err(DumpError::Config(format!("Unknown isolation level '{s}'"))),
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Plan chunks and print a summary without reading any rows.
    DryRun,
    Execute,
}

/// Dump options (non-connection related)
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Directory receiving every output file
    pub destination: PathBuf,
    /// Number of worker connections
    pub threads: usize,
    /// Rows per chunk
    pub chunk_size: u64,
    /// Rows per INSERT statement
    pub output_chunk_size: u64,
    /// Capacity of the chunk queue
    pub queue_capacity: usize,
    pub tables_without_key: TablesWithoutKeyPolicy,
    pub lock_mode: LockMode,
    /// Require all worker transactions to share one snapshot
    pub consistent: bool,
    pub isolation: IsolationLevel,
    /// Write `master-data.sql`
    pub capture_primary_status: bool,
    /// Write `slave-data.sql`
    pub capture_replica_status: bool,
    /// Emit `DROP TABLE IF EXISTS` in definition files
    pub add_drop_table: bool,
    /// Leave `USE <schema>;` out of generated files
    pub skip_use_database: bool,
    /// gzip level (1-9); `None` writes plain files
    pub compression: Option<u32>,
    pub mode: RunMode,
    /// How often queue progress is logged
    pub status_interval: Duration,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("."),
            threads: 1,
            chunk_size: 1000,
            output_chunk_size: 1000,
            queue_capacity: 1000,
            tables_without_key: TablesWithoutKeyPolicy::Error,
            lock_mode: LockMode::PerTable,
            consistent: true,
            isolation: IsolationLevel::RepeatableRead,
            capture_primary_status: true,
            capture_replica_status: false,
            add_drop_table: false,
            skip_use_database: false,
            compression: None,
            mode: RunMode::Execute,
            status_interval: Duration::from_secs(1),
        }
    }
}

impl DumpOptions {
    /// Reject option combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(DumpError::Config("threads must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(DumpError::Config("chunk-size must be at least 1".into()));
        }
        if self.output_chunk_size == 0 {
            return Err(DumpError::Config(
                "output-chunk-size must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(DumpError::Config(
                "channel-buffer-size must be at least 1".into(),
            ));
        }
        if let Some(level) = self.compression {
            if !(1..=9).contains(&level) {
                return Err(DumpError::Config(format!(
                    "compress-level must be between 1 and 9, got {level}"
                )));
            }
        }
        if self.consistent && self.lock_mode == LockMode::None {
            return Err(DumpError::Config(
                "Lock tables is required to get a consistent backup".into(),
            ));
        }
        if self.consistent && !self.isolation.keeps_snapshot() {
            return Err(DumpError::Config(format!(
                "Isolation level \"{}\" is not compatible with the consistent option",
                self.isolation
            )));
        }
        Ok(())
    }
}
