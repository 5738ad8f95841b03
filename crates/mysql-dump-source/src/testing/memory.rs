//! In-process stand-in for a MySQL server.
//!
//! `MemoryServer` implements every connection seam over a table store and
//! records each call in an event log, so ordering guarantees of the dump
//! pipeline can be asserted without a database. Sessions copy the store
//! when their snapshot begins; probes always read live data.

use async_trait::async_trait;
use mysql_types::SqlValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chunk::{ChunkBounds, DataChunk};
use crate::connector::{Connector, ControlConnection, RowSink, SnapshotSession};
use crate::error::{DumpError, Result};
use crate::replication::{BinlogPosition, ReplicaPosition};
use crate::schema::{TableRef, TableSelection};
use crate::table::Table;
use crate::task::{BoundaryQuery, KeyProbe};
use crate::IsolationLevel;

/// Something the pipeline did against the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Execute(String),
    BeginSnapshot { session: usize },
    Touch { session: usize, table: String },
    PrimaryStatus,
    ReplicaStatus,
    Stream { session: usize, table: String, sequence: u64 },
    Commit { session: usize },
}

/// Call that should fail instead of succeeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Control statements starting with this text.
    Execute(String),
    BeginSnapshot,
    /// Extraction of this `schema.table`.
    Stream(String),
    /// Boundary probes on this `schema.table`.
    Probe(String),
}

#[derive(Debug, Clone)]
struct MemoryTable {
    table: Table,
    key_index: Option<usize>,
    rows: Vec<Vec<SqlValue>>,
}

impl MemoryTable {
    fn key_of(&self, row: &[SqlValue]) -> Option<i64> {
        match row.get(self.key_index?)? {
            SqlValue::Int(k) => Some(*k),
            SqlValue::UInt(k) => i64::try_from(*k).ok(),
            _ => None,
        }
    }

    fn sorted_keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.rows.iter().filter_map(|r| self.key_of(r)).collect();
        keys.sort_unstable();
        keys
    }
}

#[derive(Default)]
struct State {
    tables: BTreeMap<TableRef, MemoryTable>,
    events: Vec<Event>,
    failures: Vec<Failure>,
    primary_status: Option<BinlogPosition>,
    replica_status: Option<ReplicaPosition>,
    next_session: usize,
}

/// Shared handle to the in-memory server. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<State>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Poisoning is ignored.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a table. `key_index` is the position of the chunking key
    /// within each row.
    pub fn add_table(&self, table: Table, key_index: Option<usize>, rows: Vec<Vec<SqlValue>>) {
        let reference = TableRef::new(table.schema.clone(), table.name.clone());
        self.state().tables.insert(
            reference,
            MemoryTable {
                table,
                key_index,
                rows,
            },
        );
    }

    /// Append a row to a live table. Open snapshots do not see it.
    pub fn insert_row(&self, table: &TableRef, row: Vec<SqlValue>) {
        if let Some(t) = self.state().tables.get_mut(table) {
            t.rows.push(row);
        }
    }

    /// Remove rows from a live table. Open snapshots still see them.
    pub fn delete_rows(&self, table: &TableRef, keep: impl Fn(&[SqlValue]) -> bool) {
        if let Some(t) = self.state().tables.get_mut(table) {
            t.rows.retain(|row| keep(row));
        }
    }

    pub fn set_primary_status(&self, status: BinlogPosition) {
        self.state().primary_status = Some(status);
    }

    pub fn set_replica_status(&self, status: ReplicaPosition) {
        self.state().replica_status = Some(status);
    }

    pub fn fail_on(&self, failure: Failure) {
        self.state().failures.push(failure);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    fn record(&self, event: Event) {
        self.state().events.push(event);
    }

    fn should_fail(&self, check: impl Fn(&Failure) -> bool) -> bool {
        self.state().failures.iter().any(check)
    }
}

#[async_trait]
impl Connector for MemoryServer {
    async fn control(&self) -> Result<Box<dyn ControlConnection>> {
        Ok(Box::new(MemoryControl {
            server: self.clone(),
        }))
    }

    async fn probe(&self) -> Result<Box<dyn KeyProbe>> {
        Ok(Box::new(MemoryProbe {
            server: self.clone(),
        }))
    }

    async fn session(&self) -> Result<Box<dyn SnapshotSession>> {
        let id = {
            let mut state = self.state();
            let id = state.next_session;
            state.next_session += 1;
            id
        };
        Ok(Box::new(MemorySession {
            id,
            server: self.clone(),
            snapshot: None,
        }))
    }
}

struct MemoryControl {
    server: MemoryServer,
}

#[async_trait]
impl ControlConnection for MemoryControl {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.server.record(Event::Execute(sql.to_string()));
        let injected = |f: &Failure| {
            matches!(f, Failure::Execute(prefix) if sql.starts_with(prefix.as_str()))
        };
        if self.server.should_fail(injected) {
            return Err(DumpError::Consistency(format!("injected failure: {sql}")));
        }
        Ok(())
    }

    async fn list_tables(&mut self, selection: &TableSelection) -> Result<Vec<TableRef>> {
        let discovered = self
            .server
            .state()
            .tables
            .keys()
            .filter(|t| selection.all_databases || selection.databases.contains(&t.schema))
            .cloned()
            .collect();
        Ok(selection.resolve(discovered))
    }

    async fn load_table(&mut self, table: &TableRef) -> Result<Table> {
        self.server
            .state()
            .tables
            .get(table)
            .map(|t| t.table.clone())
            .ok_or_else(|| DumpError::metadata(table.to_string(), "table not found"))
    }

    async fn primary_status(&mut self) -> Result<Option<BinlogPosition>> {
        self.server.record(Event::PrimaryStatus);
        Ok(self.server.state().primary_status.clone())
    }

    async fn replica_status(&mut self) -> Result<Option<ReplicaPosition>> {
        self.server.record(Event::ReplicaStatus);
        Ok(self.server.state().replica_status.clone())
    }
}

struct MemoryProbe {
    server: MemoryServer,
}

#[async_trait]
impl KeyProbe for MemoryProbe {
    async fn find_key(&mut self, table: &Table, query: &BoundaryQuery) -> Result<Option<i64>> {
        let name = table.qualified_name();
        if self
            .server
            .should_fail(|f| matches!(f, Failure::Probe(t) if *t == name))
        {
            return Err(DumpError::planning(&name, "injected failure"));
        }
        let reference = TableRef::new(table.schema.clone(), table.name.clone());
        let keys = match self.server.state().tables.get(&reference) {
            Some(t) => t.sorted_keys(),
            None => return Err(DumpError::planning(&name, "table not found")),
        };
        let matching = keys.into_iter().filter(|k| *k >= query.from);
        let offset = query.offset as usize;
        Ok(if query.descending {
            matching.rev().nth(offset)
        } else {
            matching.into_iter().nth(offset)
        })
    }
}

struct MemorySession {
    id: usize,
    server: MemoryServer,
    snapshot: Option<BTreeMap<TableRef, MemoryTable>>,
}

#[async_trait]
impl SnapshotSession for MemorySession {
    async fn begin_snapshot(&mut self, _isolation: IsolationLevel) -> Result<()> {
        self.server.record(Event::BeginSnapshot { session: self.id });
        if self.server.should_fail(|f| *f == Failure::BeginSnapshot) {
            return Err(DumpError::Consistency("injected failure".into()));
        }
        self.snapshot = Some(self.server.state().tables.clone());
        Ok(())
    }

    async fn touch(&mut self, table: &Table) -> Result<()> {
        self.server.record(Event::Touch {
            session: self.id,
            table: table.qualified_name(),
        });
        Ok(())
    }

    async fn stream_chunk(&mut self, chunk: &DataChunk, sink: &mut dyn RowSink) -> Result<u64> {
        let name = chunk.table.qualified_name();
        self.server.record(Event::Stream {
            session: self.id,
            table: name.clone(),
            sequence: chunk.sequence,
        });
        if self
            .server
            .should_fail(|f| matches!(f, Failure::Stream(t) if *t == name))
        {
            return Err(DumpError::extraction(&name, "injected failure"));
        }

        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or_else(|| DumpError::extraction(&name, "no snapshot open"))?;
        let reference = TableRef::new(chunk.table.schema.clone(), chunk.table.name.clone());
        let table = snapshot
            .get(&reference)
            .ok_or_else(|| DumpError::extraction(&name, "table not found"))?;

        let mut rows: Vec<(Option<i64>, &Vec<SqlValue>)> = table
            .rows
            .iter()
            .map(|r| (table.key_of(r), r))
            .filter(|(key, _)| match key {
                Some(k) => chunk.contains_key(*k),
                None => chunk.bounds == ChunkBounds::Single,
            })
            .collect();
        if chunk.bounds != ChunkBounds::Single {
            rows.sort_by_key(|(key, _)| *key);
        }

        let count = rows.len() as u64;
        for (_, row) in rows {
            sink.write_row(row.clone())?;
        }
        Ok(count)
    }

    async fn commit(&mut self) -> Result<()> {
        self.server.record(Event::Commit { session: self.id });
        self.snapshot = None;
        Ok(())
    }
}

/// `rows` rows of `(id, 'name-<id>')` keyed by `id`, ids `1..=rows`.
pub fn numbered_rows(rows: i64) -> Vec<Vec<SqlValue>> {
    (1..=rows)
        .map(|id| vec![SqlValue::Int(id), SqlValue::from(format!("name-{id}"))])
        .collect()
}
