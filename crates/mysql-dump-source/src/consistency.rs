//! Opening every worker snapshot at the same logical instant.
//!
//! While the export set is read-locked, each worker session starts a
//! `WITH CONSISTENT SNAPSHOT` transaction and touches one table per storage
//! engine. Replication coordinates are read under the same lock, so they
//! describe exactly the state the workers will export. The lock is released
//! only after the last session is open.

use checkpoint::{CheckpointStore, ReplicationRole};
use mysql_types::lock_tables_statement;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::connector::{ControlConnection, SnapshotSession};
use crate::error::{DumpError, Result};
use crate::replication::{BinlogPosition, ReplicaPosition};
use crate::table::Table;
use crate::{IsolationLevel, LockMode};

/// What the coordinator needs to know about the run.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPlan {
    pub lock_mode: LockMode,
    pub isolation: IsolationLevel,
    pub capture_primary_status: bool,
    pub capture_replica_status: bool,
}

/// Outcome of the protocol.
#[derive(Debug, Default)]
pub struct SnapshotReport {
    pub sessions: usize,
    pub primary: Option<BinlogPosition>,
    pub replica: Option<ReplicaPosition>,
    /// Time between taking and releasing the lock.
    pub locked_for: Option<Duration>,
}

/// Run the lock, snapshot, capture and unlock sequence.
///
/// `tables` is the whole export set (named by `LOCK TABLES`);
/// `engine_tables` holds one table per storage engine.
pub async fn establish_snapshots(
    control: &mut dyn ControlConnection,
    sessions: &mut [Box<dyn SnapshotSession>],
    tables: &[Arc<Table>],
    engine_tables: &[Arc<Table>],
    plan: SnapshotPlan,
    store: &dyn CheckpointStore,
) -> Result<SnapshotReport> {
    let lock_sql = match plan.lock_mode {
        LockMode::None => None,
        LockMode::PerTable => {
            let names: Vec<String> = tables.iter().map(|t| t.escaped_qualified_name()).collect();
            Some(lock_tables_statement(&names))
        }
        LockMode::Global => Some("FLUSH TABLES WITH READ LOCK".to_string()),
    };

    let locked_at = match &lock_sql {
        Some(sql) => {
            info!("Locking tables to get a consistent backup");
            control.execute(sql).await.map_err(|e| {
                DumpError::Consistency(format!("failed to lock tables: {e}"))
            })?;
            Some(Instant::now())
        }
        None => None,
    };

    let result = open_and_capture(control, sessions, engine_tables, plan, store).await;

    let Some(locked_at) = locked_at else {
        return result;
    };

    match result {
        Ok(mut report) => {
            control.execute("UNLOCK TABLES").await.map_err(|e| {
                DumpError::Consistency(format!("failed to unlock tables: {e}"))
            })?;
            let locked_for = locked_at.elapsed();
            info!("Tables were locked for {:?}", locked_for);
            report.locked_for = Some(locked_for);
            Ok(report)
        }
        Err(e) => {
            if let Err(unlock) = control.execute("UNLOCK TABLES").await {
                warn!("Failed to unlock tables after error: {}", unlock);
            }
            Err(e)
        }
    }
}

async fn open_and_capture(
    control: &mut dyn ControlConnection,
    sessions: &mut [Box<dyn SnapshotSession>],
    engine_tables: &[Arc<Table>],
    plan: SnapshotPlan,
    store: &dyn CheckpointStore,
) -> Result<SnapshotReport> {
    for (id, session) in sessions.iter_mut().enumerate() {
        session.begin_snapshot(plan.isolation).await?;
        for table in engine_tables {
            session.touch(table).await?;
        }
        debug!("Worker session {} opened its snapshot", id);
    }

    let mut report = SnapshotReport {
        sessions: sessions.len(),
        ..Default::default()
    };

    if plan.capture_primary_status {
        match control.primary_status().await? {
            Some(position) => {
                checkpoint::emit_checkpoint(store, &position, ReplicationRole::Primary)
                    .await
                    .map_err(|e| DumpError::Consistency(format!("{e:#}")))?;
                report.primary = Some(position);
            }
            None => warn!("Binary logging is disabled, no primary status recorded"),
        }
    }

    if plan.capture_replica_status {
        match control.replica_status().await? {
            Some(position) => {
                checkpoint::emit_checkpoint(store, &position, ReplicationRole::Replica)
                    .await
                    .map_err(|e| DumpError::Consistency(format!("{e:#}")))?;
                report.replica = Some(position);
            }
            None => warn!("Server is not a replica, no replica status recorded"),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use crate::testing::{Event, Failure, MemoryServer};
    use checkpoint::FilesystemStore;
    use tempfile::TempDir;

    fn table(name: &str, engine: &str) -> Arc<Table> {
        Arc::new(Table::new("shop", name).with_engine(engine))
    }

    fn plan(lock_mode: LockMode) -> SnapshotPlan {
        SnapshotPlan {
            lock_mode,
            isolation: IsolationLevel::RepeatableRead,
            capture_primary_status: true,
            capture_replica_status: false,
        }
    }

    async fn sessions(server: &MemoryServer, count: usize) -> Vec<Box<dyn SnapshotSession>> {
        let mut sessions = Vec::new();
        for _ in 0..count {
            sessions.push(server.session().await.unwrap());
        }
        sessions
    }

    #[tokio::test]
    async fn test_global_lock_touches_each_engine_once_per_session() {
        let server = MemoryServer::new();
        server.set_primary_status(BinlogPosition::new("mysql-bin.000003", 154));
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path());

        let tables = vec![
            table("orders", "InnoDB"),
            table("items", "InnoDB"),
            table("archive", "MyISAM"),
        ];
        let engine_tables = vec![tables[0].clone(), tables[2].clone()];
        let mut control = server.control().await.unwrap();
        let mut workers = sessions(&server, 2).await;

        let report = establish_snapshots(
            control.as_mut(),
            &mut workers,
            &tables,
            &engine_tables,
            plan(LockMode::Global),
            &store,
        )
        .await
        .unwrap();

        assert_eq!(report.sessions, 2);
        assert!(report.locked_for.is_some());
        assert_eq!(report.primary.unwrap().position, 154);

        let events = server.events();
        assert_eq!(
            events,
            vec![
                Event::Execute("FLUSH TABLES WITH READ LOCK".into()),
                Event::BeginSnapshot { session: 0 },
                Event::Touch { session: 0, table: "shop.orders".into() },
                Event::Touch { session: 0, table: "shop.archive".into() },
                Event::BeginSnapshot { session: 1 },
                Event::Touch { session: 1, table: "shop.orders".into() },
                Event::Touch { session: 1, table: "shop.archive".into() },
                Event::PrimaryStatus,
                Event::Execute("UNLOCK TABLES".into()),
            ]
        );
        assert!(tmp.path().join("master-data.sql").exists());
        assert!(tmp.path().join("master-data.json").exists());
    }

    #[tokio::test]
    async fn test_per_table_lock_names_export_set() {
        let server = MemoryServer::new();
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path());
        let tables = vec![table("orders", "InnoDB"), table("order", "InnoDB")];
        let mut control = server.control().await.unwrap();
        let mut workers = sessions(&server, 1).await;

        establish_snapshots(
            control.as_mut(),
            &mut workers,
            &tables,
            &tables[..1],
            plan(LockMode::PerTable),
            &store,
        )
        .await
        .unwrap();

        assert_eq!(
            server.events()[0],
            Event::Execute("LOCK TABLES shop.orders READ, shop.`order` READ".into())
        );
        // Binary logging off: nothing recorded, not an error.
        assert!(!tmp.path().join("master-data.sql").exists());
    }

    #[tokio::test]
    async fn test_no_lock_skips_lock_and_unlock() {
        let server = MemoryServer::new();
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path());
        let tables = vec![table("orders", "InnoDB")];
        let mut control = server.control().await.unwrap();
        let mut workers = sessions(&server, 1).await;

        let report = establish_snapshots(
            control.as_mut(),
            &mut workers,
            &tables,
            &tables,
            SnapshotPlan {
                capture_primary_status: false,
                ..plan(LockMode::None)
            },
            &store,
        )
        .await
        .unwrap();

        assert!(report.locked_for.is_none());
        assert!(!server
            .events()
            .iter()
            .any(|e| matches!(e, Event::Execute(_))));
    }

    #[tokio::test]
    async fn test_replica_status_written() {
        let server = MemoryServer::new();
        server.set_replica_status(ReplicaPosition {
            source_host: "primary.internal".into(),
            source_port: 3306,
            source_log_file: "binlog.000010".into(),
            exec_position: 4711,
            executed_gtid_set: Some("3E11FA47-71CA-11E1-9E33-C80AA9429562:1-77".into()),
            captured_at: chrono::Utc::now(),
        });
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path());
        let tables = vec![table("orders", "InnoDB")];
        let mut control = server.control().await.unwrap();
        let mut workers = sessions(&server, 1).await;

        establish_snapshots(
            control.as_mut(),
            &mut workers,
            &tables,
            &tables,
            SnapshotPlan {
                capture_primary_status: false,
                capture_replica_status: true,
                ..plan(LockMode::PerTable)
            },
            &store,
        )
        .await
        .unwrap();

        let status = std::fs::read_to_string(tmp.path().join("slave-data.sql")).unwrap();
        assert!(status.contains("MASTER_LOG_POS=4711"));
        assert!(status.contains("-- Executed GTID Set: 3E11FA47-71CA-11E1-9E33-C80AA9429562:1-77\n"));

        let json = std::fs::read_to_string(tmp.path().join("slave-data.json")).unwrap();
        let file: checkpoint::CheckpointFile = serde_json::from_str(&json).unwrap();
        let position: ReplicaPosition = file.parse().unwrap();
        assert_eq!(
            position.executed_gtid_set.as_deref(),
            Some("3E11FA47-71CA-11E1-9E33-C80AA9429562:1-77")
        );
    }

    #[tokio::test]
    async fn test_failure_still_unlocks() {
        let server = MemoryServer::new();
        server.fail_on(Failure::BeginSnapshot);
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path());
        let tables = vec![table("orders", "InnoDB")];
        let mut control = server.control().await.unwrap();
        let mut workers = sessions(&server, 2).await;

        let result = establish_snapshots(
            control.as_mut(),
            &mut workers,
            &tables,
            &tables,
            plan(LockMode::Global),
            &store,
        )
        .await;

        assert!(matches!(result, Err(DumpError::Consistency(_))));
        assert_eq!(
            server.events().last(),
            Some(&Event::Execute("UNLOCK TABLES".into()))
        );
    }

    #[tokio::test]
    async fn test_lock_failure_is_fatal() {
        let server = MemoryServer::new();
        server.fail_on(Failure::Execute("LOCK TABLES".into()));
        let tmp = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp.path());
        let tables = vec![table("orders", "InnoDB")];
        let mut control = server.control().await.unwrap();
        let mut workers = sessions(&server, 1).await;

        let result = establish_snapshots(
            control.as_mut(),
            &mut workers,
            &tables,
            &tables,
            plan(LockMode::PerTable),
            &store,
        )
        .await;

        assert!(matches!(result, Err(DumpError::Consistency(_))));
        assert!(!server
            .events()
            .iter()
            .any(|e| matches!(e, Event::BeginSnapshot { .. })));
    }
}
