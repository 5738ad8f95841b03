//! Option resolution: command line over config file over defaults.

pub mod duration;
pub mod file;

use anyhow::{bail, Context};
use chunk_dump_mysql_source::{
    ConnectionOptions, DumpOptions, IsolationLevel, LockMode, RunMode, TableRef, TableSelection,
    TablesWithoutKeyPolicy,
};

use crate::DumpArgs;
pub use duration::parse_duration;
pub use file::ConfigFile;

/// Everything a run needs, after merging all sources.
#[derive(Debug, Clone)]
pub struct Settings {
    pub connection: ConnectionOptions,
    pub selection: TableSelection,
    pub options: DumpOptions,
}

/// Merge `args` with the optional config file and validate the result.
pub fn resolve(args: &DumpArgs, file: Option<ConfigFile>) -> anyhow::Result<Settings> {
    let file = file.unwrap_or_default();
    let client = file.client;
    let dump = file.dump;
    let defaults = DumpOptions::default();
    let default_connection = ConnectionOptions::default();

    let connection = ConnectionOptions {
        host: args
            .connection
            .mysql_host
            .clone()
            .or(client.host)
            .unwrap_or(default_connection.host),
        port: args
            .connection
            .mysql_port
            .or(client.port)
            .unwrap_or(default_connection.port),
        user: args
            .connection
            .mysql_user
            .clone()
            .or(client.user)
            .unwrap_or(default_connection.user),
        password: args.connection.mysql_password.clone().or(client.password),
        socket: args.connection.mysql_socket.clone().or(client.socket),
    };

    let mode = match (args.dry_run, args.execute) {
        (true, false) => RunMode::DryRun,
        (false, true) => RunMode::Execute,
        (true, true) => bail!("--dry-run and --execute are mutually exclusive"),
        (false, false) => bail!("one of --dry-run or --execute is required"),
    };

    let table_names = if args.tables.is_empty() {
        dump.tables
    } else {
        args.tables.clone()
    };
    let selection = TableSelection {
        tables: table_names
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| TableRef::parse(t))
            .collect::<Result<_, _>>()?,
        databases: if args.databases.is_empty() {
            dump.databases
        } else {
            args.databases.clone()
        },
        all_databases: args.all_databases || dump.all_databases.unwrap_or(false),
    };
    if selection.is_empty() {
        bail!("at least one of --tables, --databases or --all-databases is required");
    }

    let destination = args
        .destination
        .clone()
        .or(dump.destination)
        .context("--destination is required")?;

    let chunk_size = args
        .chunk_size
        .or(dump.chunk_size)
        .unwrap_or(defaults.chunk_size);
    let output_chunk_size = match args.output_chunk_size.or(dump.output_chunk_size) {
        None | Some(0) => chunk_size,
        Some(n) => n,
    };

    let tables_without_key = match args
        .tables_without_uniquekey
        .as_deref()
        .or(dump.tables_without_uniquekey.as_deref())
    {
        Some(policy) => policy.parse::<TablesWithoutKeyPolicy>()?,
        None => defaults.tables_without_key,
    };
    let isolation = match args
        .isolation_level
        .as_deref()
        .or(dump.isolation_level.as_deref())
    {
        Some(level) => level.parse::<IsolationLevel>()?,
        None => defaults.isolation,
    };

    let lock_tables = args.lock_tables.or(dump.lock_tables).unwrap_or(true);
    let lock_mode = match (lock_tables, selection.all_databases) {
        (false, _) => LockMode::None,
        (true, true) => LockMode::Global,
        (true, false) => LockMode::PerTable,
    };

    let compress_level = args.compress_level.or(dump.compress_level).unwrap_or(1);
    if !(1..=9).contains(&compress_level) {
        bail!("--compress-level must be between 1 and 9, got {compress_level}");
    }
    let compression = args
        .compress
        .or(dump.compress)
        .unwrap_or(false)
        .then_some(compress_level);

    let status_interval = args
        .status_interval
        .as_deref()
        .or(dump.status_interval.as_deref());
    let status_interval = match status_interval {
        Some(s) => parse_duration(s).context("Invalid --status-interval")?,
        None => defaults.status_interval,
    };

    let options = DumpOptions {
        destination,
        threads: args.threads.or(dump.threads).unwrap_or(defaults.threads),
        chunk_size,
        output_chunk_size,
        queue_capacity: args
            .channel_buffer_size
            .or(dump.channel_buffer_size)
            .unwrap_or(defaults.queue_capacity),
        tables_without_key,
        lock_mode,
        consistent: args
            .consistent
            .or(dump.consistent)
            .unwrap_or(defaults.consistent),
        isolation,
        capture_primary_status: args
            .get_master_status
            .or(dump.get_master_status)
            .unwrap_or(defaults.capture_primary_status),
        capture_replica_status: args
            .get_slave_status
            .or(dump.get_slave_status)
            .unwrap_or(defaults.capture_replica_status),
        add_drop_table: args
            .add_drop_table
            .or(dump.add_drop_table)
            .unwrap_or(defaults.add_drop_table),
        skip_use_database: args
            .skip_use_database
            .or(dump.skip_use_database)
            .unwrap_or(defaults.skip_use_database),
        compression,
        mode,
        status_interval,
    };
    options.validate()?;

    Ok(Settings {
        connection,
        selection,
        options,
    })
}
