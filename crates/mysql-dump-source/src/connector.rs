//! Connection seams between the dump pipeline and the server.
//!
//! The pipeline only talks to these traits; `MySqlConnector` backs them with
//! `mysql_async`, `testing::memory` with an in-process table store.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, Statement, Value};
use mysql_types::{MySQLValueWithSchema, SqlValue};
use tracing::debug;

use crate::chunk::DataChunk;
use crate::error::{DumpError, Result};
use crate::replication::{
    read_primary_status, read_replica_status, BinlogPosition, ReplicaPosition,
};
use crate::schema::{list_tables, TableRef, TableSelection};
use crate::table::Table;
use crate::task::{BoundaryQuery, KeyProbe};
use crate::IsolationLevel;

/// Receives the rows of one chunk in key order.
pub trait RowSink: Send {
    fn write_row(&mut self, row: Vec<SqlValue>) -> Result<()>;
}

/// The coordinating connection: table discovery, locking and replication
/// status. Locks are session scoped, so one connection serves the whole
/// consistency protocol.
#[async_trait]
pub trait ControlConnection: Send {
    async fn execute(&mut self, sql: &str) -> Result<()>;

    async fn list_tables(&mut self, selection: &TableSelection) -> Result<Vec<TableRef>>;

    async fn load_table(&mut self, table: &TableRef) -> Result<Table>;

    /// Binary log coordinates, `None` when binary logging is off.
    async fn primary_status(&mut self) -> Result<Option<BinlogPosition>>;

    /// Replication position, `None` when the server is not a replica.
    async fn replica_status(&mut self) -> Result<Option<ReplicaPosition>>;
}

/// One worker's dedicated connection and its long-lived transaction.
#[async_trait]
pub trait SnapshotSession: Send {
    /// Open a read-only transaction with a consistent snapshot.
    async fn begin_snapshot(&mut self, isolation: IsolationLevel) -> Result<()>;

    /// Read one row of `table` so the snapshot covers its storage engine.
    async fn touch(&mut self, table: &Table) -> Result<()>;

    /// Stream the chunk's rows into `sink`, returning the row count.
    async fn stream_chunk(&mut self, chunk: &DataChunk, sink: &mut dyn RowSink) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;
}

/// Factory for every kind of connection the pipeline needs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn control(&self) -> Result<Box<dyn ControlConnection>>;

    async fn probe(&self) -> Result<Box<dyn KeyProbe>>;

    async fn session(&self) -> Result<Box<dyn SnapshotSession>>;
}

/// MySQL connection options
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Unix socket path; takes precedence over host and port.
    pub socket: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            socket: None,
        }
    }
}

impl ConnectionOptions {
    /// Connection target for log and error messages (never includes the password).
    pub fn describe(&self) -> String {
        match &self.socket {
            Some(socket) => format!("{}@unix:{socket}", self.user),
            None => format!("{}@{}:{}", self.user, self.host, self.port),
        }
    }

    pub fn to_opts(&self) -> Opts {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(self.password.clone())
            .socket(self.socket.clone())
            .init(vec![
                "SET NAMES utf8mb4".to_string(),
                "SET time_zone = '+00:00'".to_string(),
            ]);
        if self.socket.is_some() {
            builder = builder.prefer_socket(true);
        }
        Opts::from(builder)
    }
}

/// `Connector` backed by a MySQL server.
pub struct MySqlConnector {
    options: ConnectionOptions,
    opts: Opts,
    pool: Pool,
}

impl MySqlConnector {
    pub fn new(options: ConnectionOptions) -> Self {
        let opts = options.to_opts();
        let pool = Pool::new(opts.clone());
        Self {
            options,
            opts,
            pool,
        }
    }

    async fn dedicated(&self) -> Result<Conn> {
        Conn::new(self.opts.clone())
            .await
            .map_err(|e| DumpError::Connection {
                target: self.options.describe(),
                message: e.to_string(),
            })
    }

    /// Close pooled probe connections.
    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn control(&self) -> Result<Box<dyn ControlConnection>> {
        Ok(Box::new(MySqlControl {
            conn: self.dedicated().await?,
        }))
    }

    async fn probe(&self) -> Result<Box<dyn KeyProbe>> {
        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| DumpError::Connection {
                target: self.options.describe(),
                message: e.to_string(),
            })?;
        Ok(Box::new(MySqlProbe { conn }))
    }

    async fn session(&self) -> Result<Box<dyn SnapshotSession>> {
        Ok(Box::new(MySqlSession {
            conn: self.dedicated().await?,
            statements: StatementCache::new(),
        }))
    }
}

struct MySqlControl {
    conn: Conn,
}

#[async_trait]
impl ControlConnection for MySqlControl {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.conn.query_drop(sql).await?;
        Ok(())
    }

    async fn list_tables(&mut self, selection: &TableSelection) -> Result<Vec<TableRef>> {
        list_tables(&mut self.conn, selection).await
    }

    async fn load_table(&mut self, table: &TableRef) -> Result<Table> {
        Table::load(&mut self.conn, &table.schema, &table.name).await
    }

    async fn primary_status(&mut self) -> Result<Option<BinlogPosition>> {
        read_primary_status(&mut self.conn).await
    }

    async fn replica_status(&mut self) -> Result<Option<ReplicaPosition>> {
        read_replica_status(&mut self.conn).await
    }
}

struct MySqlProbe {
    conn: Conn,
}

#[async_trait]
impl KeyProbe for MySqlProbe {
    async fn find_key(&mut self, table: &Table, query: &BoundaryQuery) -> Result<Option<i64>> {
        let row: Option<mysql_async::Row> = self
            .conn
            .query_first(query.sql.as_str())
            .await
            .map_err(|e| DumpError::planning(table.qualified_name(), e))?;
        match row {
            None => Ok(None),
            Some(mut row) => match row.take_opt::<Option<i64>, _>(0) {
                Some(Ok(key)) => Ok(key),
                Some(Err(e)) => Err(DumpError::planning(
                    table.qualified_name(),
                    format!("chunking key is not a signed 64-bit integer: {e}"),
                )),
                None => Ok(None),
            },
        }
    }
}

/// The statement prepared for the most recent SQL text.
///
/// Chunks of one table share their SQL, so a worker prepares again only
/// when it moves to another table or bound kind.
#[derive(Debug)]
struct StatementCache<S> {
    current: Option<(String, S)>,
}

impl<S: Clone> StatementCache<S> {
    fn new() -> Self {
        Self { current: None }
    }

    fn get(&self, sql: &str) -> Option<S> {
        match &self.current {
            Some((cached, stmt)) if cached == sql => Some(stmt.clone()),
            _ => None,
        }
    }

    /// Remember `stmt` for `sql` and return the statement it replaces.
    fn replace(&mut self, sql: String, stmt: S) -> Option<S> {
        self.current.replace((sql, stmt)).map(|(_, old)| old)
    }
}

struct MySqlSession {
    conn: Conn,
    statements: StatementCache<Statement>,
}

impl MySqlSession {
    async fn statement_for(
        &mut self,
        sql: String,
    ) -> std::result::Result<Statement, mysql_async::Error> {
        if let Some(stmt) = self.statements.get(&sql) {
            return Ok(stmt);
        }
        debug!("Preparing: {}", sql);
        let stmt = self.conn.prep(sql.as_str()).await?;
        if let Some(old) = self.statements.replace(sql, stmt.clone()) {
            self.conn.close(old).await?;
        }
        Ok(stmt)
    }
}

#[async_trait]
impl SnapshotSession for MySqlSession {
    async fn begin_snapshot(&mut self, isolation: IsolationLevel) -> Result<()> {
        let consistency = |e: mysql_async::Error| {
            DumpError::Consistency(format!("failed to open worker transaction: {e}"))
        };
        self.conn
            .query_drop(format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                isolation.as_sql()
            ))
            .await
            .map_err(consistency)?;
        self.conn
            .query_drop("START TRANSACTION WITH CONSISTENT SNAPSHOT, READ ONLY")
            .await
            .map_err(consistency)?;
        Ok(())
    }

    async fn touch(&mut self, table: &Table) -> Result<()> {
        self.conn
            .query_drop(format!(
                "SELECT 1 FROM {} LIMIT 1",
                table.escaped_qualified_name()
            ))
            .await
            .map_err(|e| {
                DumpError::Consistency(format!(
                    "failed to read {} inside the snapshot: {e}",
                    table.qualified_name()
                ))
            })
    }

    async fn stream_chunk(&mut self, chunk: &DataChunk, sink: &mut dyn RowSink) -> Result<u64> {
        let label = chunk.table.qualified_name();
        let stmt = self
            .statement_for(chunk.prepare_sql())
            .await
            .map_err(|e| DumpError::extraction(&label, e))?;

        let params = match chunk.params() {
            p if p.is_empty() => Params::Empty,
            p => Params::Positional(p.into_iter().map(Value::Int).collect()),
        };

        let mut result = self
            .conn
            .exec_iter(stmt, params)
            .await
            .map_err(|e| DumpError::extraction(&label, e))?;

        let mut rows = 0u64;
        while let Some(mut row) = result
            .next()
            .await
            .map_err(|e| DumpError::extraction(&label, e))?
        {
            let columns = row.columns();
            let values = (0..row.len())
                .map(|i| {
                    let value = row.take::<Value, _>(i).unwrap_or(Value::NULL);
                    MySQLValueWithSchema::new(value, columns[i].column_type()).into_sql_value()
                })
                .collect();
            sink.write_row(values)?;
            rows += 1;
        }
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }
}
