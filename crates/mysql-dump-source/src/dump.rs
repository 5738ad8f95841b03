use checkpoint::FilesystemStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::connector::{Connector, ControlConnection};
use crate::consistency::{establish_snapshots, SnapshotPlan};
use crate::error::{DumpError, Result};
use crate::manager::{DumpSummary, TaskManager};
use crate::output::{write_definition_file, OutputOptions};
use crate::schema::TableSelection;
use crate::{DumpOptions, RunMode, TablesWithoutKeyPolicy};

/// Export the selected tables.
///
/// Validates `options`, loads table metadata over one control connection,
/// then either plans every table (dry run) or opens `threads` snapshot
/// sessions under the consistency protocol and runs the full pipeline.
pub async fn run_dump(
    connector: Arc<dyn Connector>,
    selection: &TableSelection,
    options: &DumpOptions,
) -> Result<DumpSummary> {
    options.validate()?;
    if selection.is_empty() {
        return Err(DumpError::Config(
            "at least one of tables, databases or all-databases is required".into(),
        ));
    }
    if let Ok(cpus) = std::thread::available_parallelism() {
        if options.threads > cpus.get() {
            warn!(
                "{} threads requested but only {} CPUs are available",
                options.threads, cpus
            );
        }
    }

    let mut control = connector.control().await?;
    let tables = control.list_tables(selection).await?;
    if tables.is_empty() {
        warn!("No tables matched the selection");
        return Ok(DumpSummary::default());
    }

    let mut manager = TaskManager::new(options);
    for table in &tables {
        manager.add_task(control.load_table(table).await?);
    }
    if options.tables_without_key == TablesWithoutKeyPolicy::Error {
        if let Some(table) = manager.tables().iter().find(|t| t.chunking_key().is_none()) {
            return Err(DumpError::NoChunkingKey(table.qualified_name()));
        }
    }
    info!("Exporting {} tables", tables.len());

    let reporter = manager.start_status_reporter(options.status_interval);
    let result = match options.mode {
        RunMode::DryRun => manager.run_dry(connector.clone()).await,
        RunMode::Execute => execute(connector, control, &mut manager, options).await,
    };
    reporter.abort();
    let summary = result?;

    info!(
        "{} chunks, {} rows. Execution time: {:?}",
        summary.total_chunks(),
        summary.total_rows(),
        manager.progress().elapsed()
    );
    Ok(summary)
}

async fn execute(
    connector: Arc<dyn Connector>,
    mut control: Box<dyn ControlConnection>,
    manager: &mut TaskManager,
    options: &DumpOptions,
) -> Result<DumpSummary> {
    std::fs::create_dir_all(&options.destination)
        .map_err(|e| DumpError::io(&options.destination, e))?;

    let mut sessions = Vec::with_capacity(options.threads);
    for _ in 0..options.threads {
        sessions.push(connector.session().await?);
    }

    let store = FilesystemStore::new(&options.destination);
    establish_snapshots(
        control.as_mut(),
        &mut sessions,
        &manager.tables(),
        &manager.engine_tables(),
        SnapshotPlan {
            lock_mode: options.lock_mode,
            isolation: options.isolation,
            capture_primary_status: options.capture_primary_status,
            capture_replica_status: options.capture_replica_status,
        },
        &store,
    )
    .await?;
    drop(control);

    let output = Arc::new(OutputOptions {
        destination: options.destination.clone(),
        compression: options.compression,
        use_database: !options.skip_use_database,
        add_drop_table: options.add_drop_table,
    });
    for table in manager.tables() {
        write_definition_file(&output, &table)?;
    }

    manager.run_execute(connector, sessions, output).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{KeyColumn, Table};
    use crate::testing::{numbered_rows, Event, MemoryServer};
    use crate::{BinlogPosition, LockMode, TableRef};
    use tempfile::TempDir;

    fn seeded_server() -> MemoryServer {
        let server = MemoryServer::new();
        server.add_table(
            Table::new("sakila", "city")
                .with_primary_key(vec![KeyColumn::new("city_id", true)])
                .with_create_table_sql("CREATE TABLE `city` (`city_id` smallint)")
                .with_estimated_rows(600),
            Some(0),
            numbered_rows(600),
        );
        server.add_table(
            Table::new("sakila", "film_text")
                .with_engine("MyISAM")
                .with_create_table_sql("CREATE TABLE `film_text` (`title` text)"),
            None,
            numbered_rows(3),
        );
        server.set_primary_status(BinlogPosition::new("mysql-bin.000001", 4));
        server
    }

    fn sakila() -> TableSelection {
        TableSelection {
            databases: vec!["sakila".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_execute_writes_all_files() {
        let server = seeded_server();
        let tmp = TempDir::new().unwrap();
        let options = DumpOptions {
            destination: tmp.path().to_path_buf(),
            threads: 2,
            tables_without_key: TablesWithoutKeyPolicy::SingleChunk,
            add_drop_table: true,
            ..Default::default()
        };

        let summary = run_dump(Arc::new(server.clone()), &sakila(), &options)
            .await
            .unwrap();
        assert_eq!(summary.to_string(), "   1 -> sakila.city\n   1 -> sakila.film_text\n");
        assert_eq!(summary.total_rows(), 603);

        for file in [
            "sakila.city-definition.sql",
            "sakila.film_text-definition.sql",
            "master-data.sql",
            "master-data.json",
        ] {
            assert!(tmp.path().join(file).exists(), "{file} missing");
        }
        let definition =
            std::fs::read_to_string(tmp.path().join("sakila.city-definition.sql")).unwrap();
        assert!(definition.contains("DROP TABLE IF EXISTS sakila.city;"));

        let events = server.events();
        let unlock = events
            .iter()
            .position(|e| *e == Event::Execute("UNLOCK TABLES".into()))
            .unwrap();
        let last_begin = events
            .iter()
            .rposition(|e| matches!(e, Event::BeginSnapshot { .. }))
            .unwrap();
        let first_stream = events
            .iter()
            .position(|e| matches!(e, Event::Stream { .. }))
            .unwrap();
        assert!(last_begin < unlock);
        assert!(unlock < first_stream);
        assert_eq!(
            events[0],
            Event::Execute("LOCK TABLES sakila.city READ, sakila.film_text READ".into())
        );
    }

    #[tokio::test]
    async fn test_dry_run_reads_no_rows() {
        let server = seeded_server();
        let tmp = TempDir::new().unwrap();
        let destination = tmp.path().join("never-created");
        let options = DumpOptions {
            destination: destination.clone(),
            chunk_size: 100,
            tables_without_key: TablesWithoutKeyPolicy::SingleChunk,
            mode: RunMode::DryRun,
            ..Default::default()
        };

        let summary = run_dump(Arc::new(server.clone()), &sakila(), &options)
            .await
            .unwrap();
        assert_eq!(summary.tables[0].chunks, 6);
        assert!(!destination.exists());
        assert!(server.events().is_empty());
    }

    #[tokio::test]
    async fn test_table_without_key_fails_by_default() {
        let server = seeded_server();
        let tmp = TempDir::new().unwrap();
        let options = DumpOptions {
            destination: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let result = run_dump(Arc::new(server.clone()), &sakila(), &options).await;
        assert!(matches!(result, Err(DumpError::NoChunkingKey(ref t)) if t == "sakila.film_text"));
        // Rejected before any lock is taken.
        assert!(server.events().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_connecting() {
        let server = seeded_server();
        let options = DumpOptions {
            lock_mode: LockMode::None,
            ..Default::default()
        };
        let result = run_dump(Arc::new(server.clone()), &sakila(), &options).await;
        assert!(matches!(result, Err(DumpError::Config(_))));

        let result = run_dump(
            Arc::new(server.clone()),
            &TableSelection::default(),
            &DumpOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(DumpError::Config(_))));
        assert!(server.events().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_table_selection() {
        let server = seeded_server();
        let tmp = TempDir::new().unwrap();
        let options = DumpOptions {
            destination: tmp.path().to_path_buf(),
            mode: RunMode::DryRun,
            ..Default::default()
        };
        let selection = TableSelection {
            tables: vec![TableRef::new("sakila", "city")],
            ..Default::default()
        };
        let summary = run_dump(Arc::new(server), &selection, &options)
            .await
            .unwrap();
        assert_eq!(summary.tables.len(), 1);
    }
}
