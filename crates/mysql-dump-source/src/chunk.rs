//! Chunk descriptors and the SQL that extracts them.

use mysql_types::quote_identifier;
use std::sync::Arc;

use crate::table::Table;

/// Key range covered by one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBounds {
    /// Closed range `[min, max]`.
    Ranged { min: i64, max: i64 },
    /// Open range `[min, ..)`. `max` is the largest key seen while
    /// planning; rows above it are still extracted.
    Last { min: i64, max: i64 },
    /// Whole table, for tables without a chunking key.
    Single,
}

/// One unit of work for a worker. Immutable once planned.
#[derive(Debug, Clone)]
pub struct DataChunk {
    pub table: Arc<Table>,
    pub task_id: usize,
    /// 1-based position within its task.
    pub sequence: u64,
    /// Rows per INSERT statement.
    pub output_batch_size: u64,
    pub bounds: ChunkBounds,
}

const SELECT_PREFIX: &str = "SELECT /*!40001 SQL_NO_CACHE */ * FROM ";

impl DataChunk {
    fn escaped_key(&self) -> Option<String> {
        self.table.chunking_key().map(quote_identifier)
    }

    /// Whether extraction ignores the planned lower bound.
    ///
    /// Boundaries are sampled from live data after the snapshot was taken, so
    /// the snapshot may still hold keys below the first live key. The first
    /// chunk of a task reads everything up to its upper bound.
    pub fn open_start(&self) -> bool {
        self.sequence == 1
    }

    /// `WHERE` clause with placeholders, or empty for single chunks.
    pub fn where_sql(&self) -> String {
        let open_start = self.open_start();
        match (self.bounds, self.escaped_key()) {
            (ChunkBounds::Ranged { .. }, Some(key)) if open_start => format!(" WHERE {key} <= ?"),
            (ChunkBounds::Ranged { .. }, Some(key)) => format!(" WHERE {key} BETWEEN ? AND ?"),
            (ChunkBounds::Last { .. }, Some(_)) if open_start => String::new(),
            (ChunkBounds::Last { .. }, Some(key)) => format!(" WHERE {key} >= ?"),
            _ => String::new(),
        }
    }

    pub fn order_by_sql(&self) -> String {
        match (self.bounds, self.escaped_key()) {
            (ChunkBounds::Single, _) | (_, None) => String::new(),
            (_, Some(key)) => format!(" ORDER BY {key}"),
        }
    }

    /// Statement text prepared by the worker. Identical for every later chunk
    /// of a table with the same bound kind, so workers can reuse the statement.
    pub fn prepare_sql(&self) -> String {
        format!(
            "{SELECT_PREFIX}{}{}{}",
            self.table.escaped_qualified_name(),
            self.where_sql(),
            self.order_by_sql()
        )
    }

    /// Positional parameters matching the placeholders of `prepare_sql`.
    pub fn params(&self) -> Vec<i64> {
        match self.bounds {
            ChunkBounds::Ranged { max, .. } if self.open_start() => vec![max],
            ChunkBounds::Ranged { min, max } => vec![min, max],
            ChunkBounds::Last { min, .. } if !self.open_start() => vec![min],
            ChunkBounds::Last { .. } | ChunkBounds::Single => Vec::new(),
        }
    }

    /// Whether a row with chunking key `key` is extracted by this chunk.
    pub fn contains_key(&self, key: i64) -> bool {
        match self.bounds {
            ChunkBounds::Ranged { min, max } => (self.open_start() || key >= min) && key <= max,
            ChunkBounds::Last { min, .. } => self.open_start() || key >= min,
            ChunkBounds::Single => true,
        }
    }

    /// Planned range with the bounds inlined, for logs and summaries.
    pub fn rendered_where(&self) -> String {
        let Some(key) = self.escaped_key() else {
            return String::new();
        };
        match self.bounds {
            ChunkBounds::Ranged { min, max } => {
                format!(" WHERE {key} BETWEEN {min} AND {max} ORDER BY {key}")
            }
            ChunkBounds::Last { min, .. } => format!(" WHERE {key} >= {min} ORDER BY {key}"),
            ChunkBounds::Single => String::new(),
        }
    }

    /// Comment line written before the chunk's rows.
    pub fn header_comment(&self) -> String {
        match self.bounds {
            ChunkBounds::Ranged { min, max } | ChunkBounds::Last { min, max } => {
                format!("-- Chunk {} - from {} to {}", self.sequence, min, max)
            }
            ChunkBounds::Single => {
                format!("-- Single chunk on {}", self.table.escaped_qualified_name())
            }
        }
    }

    /// Whether no further chunk of the same task follows this one.
    pub fn is_final(&self) -> bool {
        matches!(self.bounds, ChunkBounds::Last { .. } | ChunkBounds::Single)
    }
}
