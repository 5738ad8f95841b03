//! Replication coordinates captured while tables are locked.
//!
//! Reads `SHOW MASTER STATUS` / `SHOW SLAVE STATUS` (or their MySQL 8.4
//! names) into checkpoint types that render `master-data.sql` and
//! `slave-data.sql`.

use chrono::{DateTime, Utc};
use mysql_async::prelude::*;
use mysql_async::{Conn, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DumpError, Result};

/// Binary log coordinates of the dumped server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinlogPosition {
    pub file: String,
    pub position: u64,
    pub executed_gtid_set: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, position: u64) -> Self {
        Self {
            file: file.into(),
            position,
            executed_gtid_set: None,
            captured_at: Utc::now(),
        }
    }
}

impl checkpoint::Checkpoint for BinlogPosition {
    const DATABASE_TYPE: &'static str = "mysql-binlog";

    fn to_cli_string(&self) -> String {
        format!("{}:{}", self.file, self.position)
    }

    fn to_status_sql(&self) -> String {
        let mut out = format!(
            "-- Master File: {}\n-- Master Position: {}\n",
            self.file, self.position
        );
        push_gtid_set(&mut out, self.executed_gtid_set.as_deref());
        out.push_str(&format!(
            "-- CHANGE MASTER TO MASTER_LOG_FILE='{}', MASTER_LOG_POS={};\n",
            self.file, self.position
        ));
        out
    }
}

/// Multi-source GTID sets are reported with embedded newlines.
fn push_gtid_set(out: &mut String, gtid_set: Option<&str>) {
    if let Some(gtid) = gtid_set.filter(|g| !g.trim().is_empty()) {
        out.push_str(&format!("-- Executed GTID Set: {}\n", gtid.replace('\n', "")));
    }
}

/// Where the dumped server's replication applier stood in its source's
/// binary log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaPosition {
    pub source_host: String,
    pub source_port: u16,
    pub source_log_file: String,
    pub exec_position: u64,
    /// GTIDs the replica has applied, when GTID mode is on.
    pub executed_gtid_set: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl checkpoint::Checkpoint for ReplicaPosition {
    const DATABASE_TYPE: &'static str = "mysql-replica";

    fn to_cli_string(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.source_host, self.source_port, self.source_log_file, self.exec_position
        )
    }

    fn to_status_sql(&self) -> String {
        let (host, port) = (&self.source_host, self.source_port);
        let (file, pos) = (&self.source_log_file, self.exec_position);
        let mut out = format!(
            "-- Master Host: {host}\n-- Master Port: {port}\n\
             -- Master File: {file}\n-- Master Position: {pos}\n"
        );
        push_gtid_set(&mut out, self.executed_gtid_set.as_deref());
        out.push_str(&format!(
            "-- CHANGE MASTER TO MASTER_HOST='{host}', MASTER_PORT={port}, \
             MASTER_LOG_FILE='{file}', MASTER_LOG_POS={pos};\n"
        ));
        out
    }
}

/// Run the first statement that the server accepts.
async fn query_status(conn: &mut Conn, statements: &[&str]) -> Result<Option<Row>> {
    let mut last_error = None;
    for sql in statements {
        match conn.query_first::<Row, _>(*sql).await {
            Ok(row) => return Ok(row),
            Err(e) => {
                debug!("{} failed: {}", sql, e);
                last_error = Some(e);
            }
        }
    }
    Err(DumpError::Consistency(format!(
        "could not read replication status: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn take_named<T: FromValue>(row: &mut Row, names: &[&str]) -> Option<T> {
    names
        .iter()
        .find_map(|name| row.take_opt::<Option<T>, _>(*name).and_then(|v| v.ok()))
        .flatten()
}

pub async fn read_primary_status(conn: &mut Conn) -> Result<Option<BinlogPosition>> {
    let statements = ["SHOW MASTER STATUS", "SHOW BINARY LOG STATUS"];
    let Some(mut row) = query_status(conn, &statements).await? else {
        return Ok(None);
    };
    let file: Option<String> = take_named(&mut row, &["File"]);
    let position: Option<u64> = take_named(&mut row, &["Position"]);
    match (file, position) {
        (Some(file), Some(position)) => Ok(Some(BinlogPosition {
            executed_gtid_set: take_named(&mut row, &["Executed_Gtid_Set"]),
            ..BinlogPosition::new(file, position)
        })),
        _ => Err(DumpError::Consistency(
            "unexpected columns in binary log status".into(),
        )),
    }
}

pub async fn read_replica_status(conn: &mut Conn) -> Result<Option<ReplicaPosition>> {
    let statements = ["SHOW SLAVE STATUS", "SHOW REPLICA STATUS"];
    let Some(mut row) = query_status(conn, &statements).await? else {
        return Ok(None);
    };
    let host: Option<String> = take_named(&mut row, &["Master_Host", "Source_Host"]);
    let port: Option<u16> = take_named(&mut row, &["Master_Port", "Source_Port"]);
    let file: Option<String> = take_named(
        &mut row,
        &["Relay_Master_Log_File", "Relay_Source_Log_File"],
    );
    let position: Option<u64> =
        take_named(&mut row, &["Exec_Master_Log_Pos", "Exec_Source_Log_Pos"]);
    match (host, port, file, position) {
        (Some(source_host), Some(source_port), Some(source_log_file), Some(exec_position)) => {
            Ok(Some(ReplicaPosition {
                source_host,
                source_port,
                source_log_file,
                exec_position,
                executed_gtid_set: take_named(&mut row, &["Executed_Gtid_Set"]),
                captured_at: Utc::now(),
            }))
        }
        _ => Err(DumpError::Consistency(
            "unexpected columns in replica status".into(),
        )),
    }
}
