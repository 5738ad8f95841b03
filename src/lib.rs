//! chunk-dump
//!
//! Parallel, consistent, chunked export of MySQL tables into SQL files.
//!
//! # Crates
//!
//! - `chunk_dump_mysql_source` - planner, consistency protocol, workers
//! - `mysql_types` - MySQL value and identifier rendering
//! - `checkpoint` - replication position files
//!
//! # CLI Usage
//!
//! ```bash
//! # Count the chunks each table would be split into
//! chunk-dump --databases sakila --destination /backups/sakila --dry-run
//!
//! # Dump two tables with 8 workers, gzip compressed
//! chunk-dump --tables sakila.film,sakila.city --threads 8 \
//!   --destination /backups/sakila --compress --execute
//!
//! # Read connection and dump settings from a file
//! chunk-dump --config nightly.toml --execute
//! ```

use anyhow::Context;
use clap::{ArgAction, Args, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub mod config;

pub use chunk_dump_mysql_source as mysql;

use chunk_dump_mysql_source::{run_dump, DumpSummary, MySqlConnector};

/// MySQL connection options. Unset values fall back to the config file.
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectionArgs {
    /// MySQL hostname
    #[arg(long, env = "MYSQL_HOST")]
    pub mysql_host: Option<String>,

    /// MySQL port number
    #[arg(long, env = "MYSQL_PORT")]
    pub mysql_port: Option<u16>,

    /// MySQL user name
    #[arg(long, env = "MYSQL_USER")]
    pub mysql_user: Option<String>,

    /// MySQL password
    #[arg(long, env = "MYSQL_PASSWORD", hide_env_values = true)]
    pub mysql_password: Option<String>,

    /// MySQL socket file
    #[arg(long, env = "MYSQL_SOCKET")]
    pub mysql_socket: Option<String>,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct DumpArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// TOML file with [client] and [dump] sections
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Comma separated tables to dump, each as schema.table
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Comma separated databases to dump
    #[arg(long, value_delimiter = ',')]
    pub databases: Vec<String>,

    /// Dump every database
    #[arg(long)]
    pub all_databases: bool,

    /// Directory to store the dump files
    #[arg(long, value_name = "DIR")]
    pub destination: Option<PathBuf>,

    /// Number of worker connections [default: 1]
    #[arg(long)]
    pub threads: Option<usize>,

    /// Rows per chunk [default: 1000]
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Rows per INSERT statement; 0 uses the chunk size
    #[arg(long)]
    pub output_chunk_size: Option<u64>,

    /// Capacity of the chunk queue [default: 1000]
    #[arg(long)]
    pub channel_buffer_size: Option<usize>,

    /// Lock tables while worker snapshots are opened [default: true]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub lock_tables: Option<bool>,

    /// Require every worker to share one snapshot [default: true]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub consistent: Option<bool>,

    /// REPEATABLE READ, SERIALIZABLE, READ COMMITTED or READ UNCOMMITTED
    #[arg(long)]
    pub isolation_level: Option<String>,

    /// What to do with tables without a usable key: error or single-chunk
    #[arg(long)]
    pub tables_without_uniquekey: Option<String>,

    /// Write master-data.sql [default: true]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub get_master_status: Option<bool>,

    /// Write slave-data.sql [default: false]
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub get_slave_status: Option<bool>,

    /// Add DROP TABLE IF EXISTS before each CREATE TABLE
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub add_drop_table: Option<bool>,

    /// Leave USE <database> out of the dump files
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub skip_use_database: Option<bool>,

    /// gzip the output files
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub compress: Option<bool>,

    /// Compression level from 1 (best speed) to 9 (best compression) [default: 1]
    #[arg(long)]
    pub compress_level: Option<u32>,

    /// How often queue progress is logged, e.g. "1s" or "500ms"
    #[arg(long)]
    pub status_interval: Option<String>,

    /// Only count the chunks per table
    #[arg(long)]
    pub dry_run: bool,

    /// Run the dump
    #[arg(long)]
    pub execute: bool,

    /// Display debug information
    #[arg(long, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only display warnings and errors
    #[arg(long)]
    pub quiet: bool,
}

impl DumpArgs {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

/// Resolve options, run the dump and close pooled connections.
pub async fn run(args: DumpArgs) -> anyhow::Result<DumpSummary> {
    let file = match &args.config {
        Some(path) => Some(config::ConfigFile::load(path)?),
        None => None,
    };
    let settings = config::resolve(&args, file)?;

    info!("Connecting to {}", settings.connection.describe());
    let connector = Arc::new(MySqlConnector::new(settings.connection.clone()));
    let summary = run_dump(connector.clone(), &settings.selection, &settings.options)
        .await
        .context("Dump failed")?;

    if let Ok(connector) = Arc::try_unwrap(connector) {
        connector.disconnect().await?;
    }
    Ok(summary)
}
