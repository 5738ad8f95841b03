//! Per-table chunk planner.
//!
//! The planner walks the chunking key with `LIMIT 1 OFFSET N` probes and
//! pushes each range into the pipeline as soon as it is known, so workers
//! start extracting before the whole table has been planned.

use async_trait::async_trait;
use mysql_types::quote_identifier;
use std::sync::Arc;
use tracing::{debug, info};

use crate::chunk::{ChunkBounds, DataChunk};
use crate::error::{DumpError, Result};
use crate::table::Table;
use crate::TablesWithoutKeyPolicy;

/// A single key lookup issued by the planner.
///
/// `sql` is the literal query text; `from`, `offset` and `descending`
/// describe the same lookup structurally: the key `offset` positions past
/// the first key `>= from`, in ascending (or descending) key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryQuery {
    pub sql: String,
    pub from: i64,
    pub offset: u64,
    pub descending: bool,
}

/// Source of chunk boundaries.
#[async_trait]
pub trait KeyProbe: Send {
    /// Run a boundary lookup. `Ok(None)` means no row matched.
    async fn find_key(&mut self, table: &Table, query: &BoundaryQuery) -> Result<Option<i64>>;
}

/// Destination of planned chunks.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Enqueue a chunk, waiting while the queue is full.
    async fn submit(&self, chunk: DataChunk) -> Result<()>;
}

/// Planning state for one table. Owned and mutated by its planner only.
#[derive(Debug)]
pub struct Task {
    pub id: usize,
    pub table: Arc<Table>,
    /// Rows per chunk (N).
    pub chunk_size: u64,
    pub output_batch_size: u64,
    pub chunk_min: i64,
    pub chunk_max: i64,
    pub total_chunks: u64,
}

impl Task {
    pub fn new(id: usize, table: Arc<Table>, chunk_size: u64, output_batch_size: u64) -> Self {
        Self {
            id,
            table,
            chunk_size,
            output_batch_size,
            chunk_min: 0,
            chunk_max: 0,
            total_chunks: 0,
        }
    }

    /// Chunk count implied by the table's row estimate.
    pub fn estimated_chunks(&self) -> u64 {
        if self.table.chunking_key().is_none() {
            return 1;
        }
        self.table.estimated_rows.div_ceil(self.chunk_size.max(1))
    }

    fn key_offset_sql(&self, key: &str, from: i64, offset: u64) -> String {
        let key = quote_identifier(key);
        let table = self.table.escaped_qualified_name();
        if offset == 0 {
            format!("SELECT {key} FROM {table} WHERE {key} >= {from} ORDER BY {key} LIMIT 1")
        } else {
            format!(
                "SELECT {key} FROM {table} WHERE {key} >= {from} ORDER BY {key} LIMIT 1 OFFSET {offset}"
            )
        }
    }

    /// Probe for the end of the chunk following `chunk_max`.
    pub fn chunk_sql_query(&self) -> Option<String> {
        let key = self.table.chunking_key()?;
        Some(self.next_boundary(key).sql)
    }

    /// Probe for any key at or after `chunk_min`.
    pub fn last_chunk_sql_query(&self) -> Option<String> {
        let key = self.table.chunking_key()?;
        Some(self.remaining_rows(key).sql)
    }

    fn next_boundary(&self, key: &str) -> BoundaryQuery {
        self.ascending(key, self.chunk_max, self.chunk_size)
    }

    fn remaining_rows(&self, key: &str) -> BoundaryQuery {
        self.ascending(key, self.chunk_min, 0)
    }

    fn ascending(&self, key: &str, from: i64, offset: u64) -> BoundaryQuery {
        BoundaryQuery {
            sql: self.key_offset_sql(key, from, offset),
            from,
            offset,
            descending: false,
        }
    }

    fn max_key_query(&self, key: &str, from: i64) -> BoundaryQuery {
        let quoted = quote_identifier(key);
        BoundaryQuery {
            sql: format!(
                "SELECT {quoted} FROM {} WHERE {quoted} >= {from} ORDER BY {quoted} DESC LIMIT 1",
                self.table.escaped_qualified_name()
            ),
            from,
            offset: 0,
            descending: true,
        }
    }

    async fn emit(&mut self, sink: &dyn ChunkSink, bounds: ChunkBounds) -> Result<()> {
        self.total_chunks += 1;
        let chunk = DataChunk {
            table: self.table.clone(),
            task_id: self.id,
            sequence: self.total_chunks,
            output_batch_size: self.output_batch_size,
            bounds,
        };
        debug!(
            "Planned {} chunk {}:{}",
            self.table.qualified_name(),
            chunk.sequence,
            chunk.rendered_where()
        );
        sink.submit(chunk).await
    }

    /// Plan every chunk of the table into `sink`. Returns the chunk count.
    pub async fn create_chunks(
        &mut self,
        probe: &mut dyn KeyProbe,
        sink: &dyn ChunkSink,
        policy: TablesWithoutKeyPolicy,
    ) -> Result<u64> {
        if self.chunk_size == 0 {
            return Err(DumpError::Config("chunk-size must be at least 1".into()));
        }

        let Some(key) = self.table.chunking_key().map(str::to_string) else {
            return match policy {
                TablesWithoutKeyPolicy::Error => {
                    Err(DumpError::NoChunkingKey(self.table.qualified_name()))
                }
                TablesWithoutKeyPolicy::SingleChunk => {
                    info!(
                        "Table {} has no usable key, exporting it as a single chunk",
                        self.table.qualified_name()
                    );
                    self.emit(sink, ChunkBounds::Single).await?;
                    Ok(self.total_chunks)
                }
            };
        };

        let first = probe
            .find_key(&self.table, &self.ascending(&key, i64::MIN, 0))
            .await?;
        let Some(first) = first else {
            info!("Table {} is empty", self.table.qualified_name());
            return Ok(0);
        };
        // Display bound only; the first chunk is extracted open below.
        self.chunk_min = first;

        // The first boundary counts the start key itself; later ones start
        // from the previous boundary, which is already covered.
        let mut next_probe = self.ascending(&key, first, self.chunk_size - 1);
        loop {
            match probe.find_key(&self.table, &next_probe).await? {
                Some(boundary) => {
                    self.chunk_max = boundary;
                    self.emit(
                        sink,
                        ChunkBounds::Ranged {
                            min: self.chunk_min,
                            max: boundary,
                        },
                    )
                    .await?;
                    let Some(next_min) = boundary.checked_add(1) else {
                        break;
                    };
                    self.chunk_min = next_min;
                    next_probe = self.next_boundary(&key);
                }
                None => {
                    let remaining = self.remaining_rows(&key);
                    if probe.find_key(&self.table, &remaining).await?.is_some() {
                        let max = probe
                            .find_key(&self.table, &self.max_key_query(&key, self.chunk_min))
                            .await?
                            .unwrap_or(self.chunk_min);
                        self.chunk_max = max;
                        self.emit(
                            sink,
                            ChunkBounds::Last {
                                min: self.chunk_min,
                                max,
                            },
                        )
                        .await?;
                    }
                    break;
                }
            }
        }

        info!(
            "Planned {} chunks for {}",
            self.total_chunks,
            self.table.qualified_name()
        );
        Ok(self.total_chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::KeyColumn;
    use std::sync::Mutex;

    /// Probe answering from a sorted key list and recording every query.
    struct VecProbe {
        keys: Vec<i64>,
        queries: Vec<BoundaryQuery>,
    }

    impl VecProbe {
        fn new(mut keys: Vec<i64>) -> Self {
            keys.sort_unstable();
            Self {
                keys,
                queries: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl KeyProbe for VecProbe {
        async fn find_key(
            &mut self,
            _table: &Table,
            query: &BoundaryQuery,
        ) -> Result<Option<i64>> {
            self.queries.push(query.clone());
            let mut matching = self.keys.iter().copied().filter(|k| *k >= query.from);
            let found = if query.descending {
                matching.collect::<Vec<_>>().into_iter().rev().nth(query.offset as usize)
            } else {
                matching.nth(query.offset as usize)
            };
            Ok(found)
        }
    }

    #[derive(Default)]
    struct CollectSink {
        chunks: Mutex<Vec<DataChunk>>,
    }

    #[async_trait]
    impl ChunkSink for CollectSink {
        async fn submit(&self, chunk: DataChunk) -> Result<()> {
            self.chunks.lock().unwrap().push(chunk);
            Ok(())
        }
    }

    fn keyed_table(name: &str) -> Arc<Table> {
        Arc::new(Table::new("sakila", name).with_primary_key(vec![KeyColumn::new(
            format!("{name}_id"),
            true,
        )]))
    }

    async fn plan(keys: Vec<i64>, chunk_size: u64) -> (Task, Vec<DataChunk>, VecProbe) {
        let mut task = Task::new(0, keyed_table("city"), chunk_size, chunk_size);
        let mut probe = VecProbe::new(keys);
        let sink = CollectSink::default();
        task.create_chunks(&mut probe, &sink, TablesWithoutKeyPolicy::Error)
            .await
            .unwrap();
        let chunks = sink.chunks.into_inner().unwrap();
        (task, chunks, probe)
    }

    fn covered(chunks: &[DataChunk], keys: &[i64]) -> Vec<i64> {
        keys.iter()
            .copied()
            .filter(|k| {
                chunks
                    .iter()
                    .filter(|c| match c.bounds {
                        ChunkBounds::Ranged { min, max } => *k >= min && *k <= max,
                        ChunkBounds::Last { min, .. } => *k >= min,
                        ChunkBounds::Single => true,
                    })
                    .count()
                    == 1
            })
            .collect()
    }

    #[test]
    fn test_chunk_sql_query_shape() {
        let mut task = Task::new(0, keyed_table("city"), 100, 100);
        task.chunk_max = 1570;
        assert_eq!(
            task.chunk_sql_query().unwrap(),
            "SELECT city_id FROM sakila.city WHERE city_id >= 1570 ORDER BY city_id LIMIT 1 OFFSET 100"
        );
        task.chunk_min = 1571;
        assert_eq!(
            task.last_chunk_sql_query().unwrap(),
            "SELECT city_id FROM sakila.city WHERE city_id >= 1571 ORDER BY city_id LIMIT 1"
        );
    }

    #[tokio::test]
    async fn test_chunk_count_is_ceiling() {
        for (rows, chunk_size) in [(1, 1), (10, 3), (100, 10), (101, 10), (99, 10), (7, 100)] {
            let keys: Vec<i64> = (1..=rows).collect();
            let (task, chunks, _) = plan(keys.clone(), chunk_size).await;
            let expected = (rows as u64).div_ceil(chunk_size);
            assert_eq!(chunks.len() as u64, expected, "rows={rows} n={chunk_size}");
            assert_eq!(task.total_chunks, expected);
            assert_eq!(covered(&chunks, &keys), keys, "every key exactly once");
        }
    }

    #[tokio::test]
    async fn test_sparse_and_negative_keys() {
        let keys = vec![-50, -7, 0, 3, 4, 90, 1000, 1001, 5000, i64::MAX];
        let (_, chunks, _) = plan(keys.clone(), 3).await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(covered(&chunks, &keys), keys);
        assert_eq!(
            chunks[0].bounds,
            ChunkBounds::Ranged { min: -50, max: 0 }
        );
    }

    #[tokio::test]
    async fn test_ranges_are_ordered_and_sequenced() {
        let keys: Vec<i64> = (1..=95).map(|k| k * 3).collect();
        let (_, chunks, _) = plan(keys, 10).await;

        let mut previous_max = i64::MIN;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i as u64 + 1);
            let (min, max) = match chunk.bounds {
                ChunkBounds::Ranged { min, max } | ChunkBounds::Last { min, max } => (min, max),
                ChunkBounds::Single => panic!("unexpected single chunk"),
            };
            assert!(min > previous_max, "chunk_min never rewinds");
            assert!(max >= min);
            previous_max = max;
        }
        assert!(chunks.last().unwrap().is_final());
        assert!(chunks[..chunks.len() - 1].iter().all(|c| !c.is_final()));
    }

    #[tokio::test]
    async fn test_later_probes_start_at_previous_boundary() {
        let keys: Vec<i64> = (1..=30).collect();
        let (_, _, probe) = plan(keys, 10).await;
        let ascending: Vec<&BoundaryQuery> =
            probe.queries.iter().filter(|q| !q.descending).collect();
        // first key, first boundary, then boundaries after 10 and 20
        assert_eq!(ascending[1].from, 1);
        assert_eq!(ascending[1].offset, 9);
        assert_eq!(ascending[2].from, 10);
        assert_eq!(ascending[2].offset, 10);
        assert_eq!(
            ascending[2].sql,
            "SELECT city_id FROM sakila.city WHERE city_id >= 10 ORDER BY city_id LIMIT 1 OFFSET 10"
        );
    }

    #[tokio::test]
    async fn test_small_table_gets_single_last_chunk() {
        let keys: Vec<i64> = (1..=600).collect();
        let (task, chunks, _) = plan(keys, 1000).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bounds, ChunkBounds::Last { min: 1, max: 600 });
        assert_eq!(chunks[0].rendered_where(), " WHERE city_id >= 1 ORDER BY city_id");
        assert_eq!(task.chunk_max, 600);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_chunk() {
        let keys: Vec<i64> = (1..=20).collect();
        let (_, chunks, _) = plan(keys, 10).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks
            .iter()
            .all(|c| matches!(c.bounds, ChunkBounds::Ranged { .. })));
    }

    #[tokio::test]
    async fn test_empty_table_has_no_chunks() {
        let (task, chunks, _) = plan(Vec::new(), 10).await;
        assert!(chunks.is_empty());
        assert_eq!(task.total_chunks, 0);
    }

    #[tokio::test]
    async fn test_no_key_single_chunk_policy() {
        let mut task = Task::new(3, Arc::new(Table::new("app", "log")), 10, 10);
        let mut probe = VecProbe::new(Vec::new());
        let sink = CollectSink::default();
        let count = task
            .create_chunks(&mut probe, &sink, TablesWithoutKeyPolicy::SingleChunk)
            .await
            .unwrap();

        assert_eq!(count, 1);
        let chunks = sink.chunks.into_inner().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bounds, ChunkBounds::Single);
        assert_eq!(chunks[0].task_id, 3);
        assert!(!chunks[0].prepare_sql().contains("WHERE"));
        assert!(probe.queries.is_empty());
    }

    #[tokio::test]
    async fn test_no_key_error_policy() {
        let mut task = Task::new(0, Arc::new(Table::new("app", "log")), 10, 10);
        let mut probe = VecProbe::new(vec![1, 2, 3]);
        let sink = CollectSink::default();
        let result = task
            .create_chunks(&mut probe, &sink, TablesWithoutKeyPolicy::Error)
            .await;

        assert!(matches!(result, Err(DumpError::NoChunkingKey(ref t)) if t == "app.log"));
        assert!(sink.chunks.into_inner().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_rejected() {
        let mut task = Task::new(0, keyed_table("city"), 0, 0);
        let mut probe = VecProbe::new(vec![1]);
        let sink = CollectSink::default();
        let result = task
            .create_chunks(&mut probe, &sink, TablesWithoutKeyPolicy::Error)
            .await;
        assert!(matches!(result, Err(DumpError::Config(_))));
    }

    #[test]
    fn test_estimated_chunks() {
        let table = Table::new("sakila", "city")
            .with_primary_key(vec![KeyColumn::new("city_id", true)])
            .with_estimated_rows(2500);
        let task = Task::new(0, Arc::new(table), 1000, 1000);
        assert_eq!(task.estimated_chunks(), 3);
    }
}
