//! Table metadata captured once before planning starts.

use mysql_async::prelude::*;
use mysql_async::{Conn, Row};
use mysql_types::{is_chunkable_key_type, qualified_identifier, quote_identifier};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{DumpError, Result};

/// A primary or unique key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    /// Integer typed, fits in `i64` and cannot be NULL.
    pub chunkable: bool,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, chunkable: bool) -> Self {
        Self {
            name: name.into(),
            chunkable,
        }
    }
}

/// One exported table. Shared read-only between planner, manager and
/// workers once constructed.
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: String,
    pub name: String,
    /// Every column of the primary key, in index order.
    pub primary_key: Vec<KeyColumn>,
    /// Columns carrying a single-column unique index.
    pub unique_keys: Vec<KeyColumn>,
    pub engine: String,
    pub collation: Option<String>,
    pub create_table_sql: String,
    /// `TABLE_ROWS` estimate from INFORMATION_SCHEMA.
    pub estimated_rows: u64,
    pub data_length: u64,
    pub index_length: u64,
    chunking_key: OnceLock<Option<String>>,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            primary_key: Vec::new(),
            unique_keys: Vec::new(),
            engine: "InnoDB".to_string(),
            collation: None,
            create_table_sql: String::new(),
            estimated_rows: 0,
            data_length: 0,
            index_length: 0,
            chunking_key: OnceLock::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: Vec<KeyColumn>) -> Self {
        self.primary_key = columns;
        self.chunking_key = OnceLock::new();
        self
    }

    pub fn with_unique_key(mut self, column: KeyColumn) -> Self {
        self.unique_keys.push(column);
        self.chunking_key = OnceLock::new();
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    pub fn with_create_table_sql(mut self, sql: impl Into<String>) -> Self {
        self.create_table_sql = sql.into();
        self
    }

    pub fn with_estimated_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = rows;
        self
    }

    /// Column the planner walks: the primary key when it is a single
    /// chunkable column, otherwise the first chunkable unique key.
    pub fn chunking_key(&self) -> Option<&str> {
        self.chunking_key
            .get_or_init(|| {
                if let [only] = self.primary_key.as_slice() {
                    if only.chunkable {
                        return Some(only.name.clone());
                    }
                }
                self.unique_keys
                    .iter()
                    .find(|k| k.chunkable)
                    .map(|k| k.name.clone())
            })
            .as_deref()
    }

    /// `schema.name` unquoted, used for file names and log output.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// `schema.name` quoted for SQL text.
    pub fn escaped_qualified_name(&self) -> String {
        qualified_identifier(&self.schema, &self.name)
    }

    pub fn escaped_schema(&self) -> String {
        quote_identifier(&self.schema)
    }

    pub fn escaped_name(&self) -> String {
        quote_identifier(&self.name)
    }

    /// Read metadata for `schema.name`.
    pub async fn load(conn: &mut Conn, schema: &str, name: &str) -> Result<Self> {
        let mut table = Table::new(schema, name);
        let label = table.qualified_name();

        let create: Option<Row> = conn
            .query_first(format!(
                "SHOW CREATE TABLE {}",
                table.escaped_qualified_name()
            ))
            .await
            .map_err(|e| DumpError::metadata(&label, e))?;
        let mut create = create.ok_or_else(|| DumpError::metadata(&label, "table not found"))?;
        table.create_table_sql = take_string(&mut create, 1)
            .ok_or_else(|| DumpError::metadata(&label, "SHOW CREATE TABLE returned no statement"))?;

        let stats: Option<Row> = conn
            .exec_first(
                "SELECT ENGINE, TABLE_COLLATION, DATA_LENGTH, INDEX_LENGTH, TABLE_ROWS \
                 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
                (schema, name),
            )
            .await
            .map_err(|e| DumpError::metadata(&label, e))?;
        let mut stats =
            stats.ok_or_else(|| DumpError::metadata(&label, "missing from INFORMATION_SCHEMA"))?;
        // Views have no engine.
        table.engine = take_string(&mut stats, 0).unwrap_or_default();
        table.collation = take_string(&mut stats, 1);
        table.data_length = take_u64(&mut stats, 2);
        table.index_length = take_u64(&mut stats, 3);
        table.estimated_rows = take_u64(&mut stats, 4);

        let key_rows: Vec<Row> = conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_KEY, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND COLUMN_KEY IN ('PRI', 'UNI') \
                 ORDER BY ORDINAL_POSITION",
                (schema, name),
            )
            .await
            .map_err(|e| DumpError::metadata(&label, e))?;

        for mut row in key_rows {
            let column = take_string(&mut row, 0)
                .ok_or_else(|| DumpError::metadata(&label, "key column without a name"))?;
            let key = take_string(&mut row, 1).unwrap_or_default();
            let data_type = take_string(&mut row, 2).unwrap_or_default();
            let column_type = take_string(&mut row, 3).unwrap_or_default();
            let nullable = take_string(&mut row, 4).as_deref() == Some("YES");
            let chunkable = is_chunkable_key_type(&data_type, &column_type) && !nullable;

            match key.as_str() {
                "PRI" => table.primary_key.push(KeyColumn::new(column, chunkable)),
                _ => table.unique_keys.push(KeyColumn::new(column, chunkable)),
            }
        }

        debug!(
            "Loaded {}: engine={}, rows~{}, pk={:?}, uk={:?}",
            label, table.engine, table.estimated_rows, table.primary_key, table.unique_keys
        );
        Ok(table)
    }
}

fn take_string(row: &mut Row, index: usize) -> Option<String> {
    row.take_opt::<Option<String>, _>(index)
        .and_then(|v| v.ok())
        .flatten()
}

fn take_u64(row: &mut Row, index: usize) -> u64 {
    row.take_opt::<Option<u64>, _>(index)
        .and_then(|v| v.ok())
        .flatten()
        .unwrap_or(0)
}
