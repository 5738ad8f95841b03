//! Task manager: owns the chunk queue, runs planners and the worker pool.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

use crate::chunk::DataChunk;
use crate::connector::{Connector, SnapshotSession};
use crate::error::{DumpError, Result};
use crate::output::OutputOptions;
use crate::progress::Progress;
use crate::table::Table;
use crate::task::{ChunkSink, Task};
use crate::worker::{Worker, WorkerReport};
use crate::{DumpOptions, TablesWithoutKeyPolicy};

/// Per-table result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub table: String,
    pub chunks: u64,
    /// Rows exported; zero for dry runs.
    pub rows: u64,
}

impl std::fmt::Display for TableSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "   {} -> {}", self.chunks, self.table)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    /// In task order.
    pub tables: Vec<TableSummary>,
}

impl DumpSummary {
    pub fn total_chunks(&self) -> u64 {
        self.tables.iter().map(|t| t.chunks).sum()
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

impl std::fmt::Display for DumpSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for table in &self.tables {
            writeln!(f, "{table}")?;
        }
        Ok(())
    }
}

/// `ChunkSink` feeding the bounded queue.
struct QueueSink {
    sender: mpsc::Sender<DataChunk>,
    progress: Progress,
}

#[async_trait]
impl ChunkSink for QueueSink {
    async fn submit(&self, chunk: DataChunk) -> Result<()> {
        // Counted first so a fast worker never takes an uncounted chunk.
        self.progress.chunk_queued();
        self.sender
            .send(chunk)
            .await
            .map_err(|_| DumpError::QueueClosed)
    }
}

pub struct TaskManager {
    tasks: Vec<Task>,
    /// First table seen for each storage engine.
    engine_tables: BTreeMap<String, Arc<Table>>,
    progress: Progress,
    chunk_size: u64,
    output_batch_size: u64,
    queue_capacity: usize,
    policy: TablesWithoutKeyPolicy,
}

impl TaskManager {
    pub fn new(options: &DumpOptions) -> Self {
        Self {
            tasks: Vec::new(),
            engine_tables: BTreeMap::new(),
            progress: Progress::new(),
            chunk_size: options.chunk_size,
            output_batch_size: options.output_chunk_size,
            queue_capacity: options.queue_capacity,
            policy: options.tables_without_key,
        }
    }

    /// Register a table for export and return its task id.
    pub fn add_task(&mut self, table: Table) -> usize {
        let id = self.tasks.len();
        let table = Arc::new(table);
        self.engine_tables
            .entry(table.engine.clone())
            .or_insert_with(|| table.clone());

        let task = Task::new(id, table, self.chunk_size, self.output_batch_size);
        info!(
            "Table {} has an estimated {} chunks",
            task.table.qualified_name(),
            task.estimated_chunks()
        );
        self.tasks.push(task);
        id
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tasks.iter().map(|t| t.table.clone()).collect()
    }

    /// One table per storage engine, for snapshot warm-up.
    pub fn engine_tables(&self) -> Vec<Arc<Table>> {
        self.engine_tables.values().cloned().collect()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn start_status_reporter(&self, interval: Duration) -> JoinHandle<()> {
        self.progress.start_status_reporter(interval)
    }

    /// Per-task chunk totals.
    pub fn summary(&self) -> DumpSummary {
        DumpSummary {
            tables: self
                .tasks
                .iter()
                .map(|t| TableSummary {
                    table: t.table.qualified_name(),
                    chunks: t.total_chunks,
                    rows: 0,
                })
                .collect(),
        }
    }

    /// Run one planner per task, each with its own probe connection. The
    /// queue closes once every planner has finished and `sender` is gone.
    pub async fn run_planners(
        &mut self,
        connector: Arc<dyn Connector>,
        sender: mpsc::Sender<DataChunk>,
    ) -> Result<()> {
        let sink = Arc::new(QueueSink {
            sender,
            progress: self.progress.clone(),
        });
        let policy = self.policy;

        let mut planners = JoinSet::new();
        for mut task in std::mem::take(&mut self.tasks) {
            let connector = connector.clone();
            let sink = sink.clone();
            planners.spawn(async move {
                let mut probe = connector.probe().await?;
                task.create_chunks(probe.as_mut(), sink.as_ref(), policy)
                    .await?;
                Ok::<Task, DumpError>(task)
            });
        }
        drop(sink);

        let mut finished = Vec::new();
        while let Some(joined) = planners.join_next().await {
            finished.push(joined??);
        }
        finished.sort_by_key(|t| t.id);
        self.tasks = finished;
        debug!("Planning complete");
        Ok(())
    }

    /// Plan every table, discarding the chunks.
    pub async fn run_dry(&mut self, connector: Arc<dyn Connector>) -> Result<DumpSummary> {
        let (sender, mut receiver) = mpsc::channel(self.queue_capacity);
        let progress = self.progress.clone();
        let drain = tokio::spawn(async move {
            while receiver.recv().await.is_some() {
                progress.chunk_taken();
            }
        });

        let planned = self.run_planners(connector, sender).await;
        if planned.is_err() {
            drain.abort();
        }
        planned?;
        drain.await?;
        Ok(self.summary())
    }

    /// Plan and export every table. Each session becomes one worker; the
    /// sessions must already hold their snapshot transactions.
    pub async fn run_execute(
        &mut self,
        connector: Arc<dyn Connector>,
        sessions: Vec<Box<dyn SnapshotSession>>,
        output: Arc<OutputOptions>,
    ) -> Result<DumpSummary> {
        if sessions.is_empty() {
            return Err(DumpError::Config("at least one worker is required".into()));
        }

        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = JoinSet::new();
        for (id, session) in sessions.into_iter().enumerate() {
            let worker = Worker::new(
                id,
                session,
                receiver.clone(),
                output.clone(),
                self.progress.clone(),
            );
            workers.spawn(worker.run());
        }
        drop(receiver);

        let mut reports: Vec<WorkerReport> = Vec::new();
        {
            let planning = self.run_planners(connector, sender);
            tokio::pin!(planning);
            let mut planning_done = false;

            loop {
                tokio::select! {
                    planned = &mut planning, if !planning_done => {
                        planned?;
                        planning_done = true;
                    }
                    joined = workers.join_next() => match joined {
                        Some(joined) => reports.push(joined??),
                        None => break,
                    },
                }
            }
            if !planning_done {
                planning.await?;
            }
        }

        let mut rows: HashMap<String, u64> = HashMap::new();
        for report in &reports {
            for (table, count) in &report.rows_by_table {
                *rows.entry(table.clone()).or_insert(0) += count;
            }
        }

        let mut summary = self.summary();
        for table in &mut summary.tables {
            table.rows = rows.get(&table.table).copied().unwrap_or(0);
        }
        Ok(summary)
    }
}
