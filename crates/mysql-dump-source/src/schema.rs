//! Resolving which tables a dump covers.

use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Value};
use std::collections::BTreeSet;

use crate::error::{DumpError, Result};

/// Tables never exported: server log tables cannot be locked.
const SKIPPED_TABLES: &[(&str, &str)] = &[("mysql", "slow_log"), ("mysql", "general_log")];

const SKIPPED_SCHEMAS: &[&str] = &["performance_schema", "information_schema"];

/// A `schema.table` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table`. The table part may itself contain dots.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Ok(Self::new(schema, name))
            }
            _ => Err(DumpError::Config(format!(
                "Table '{s}' must be given as schema.table"
            ))),
        }
    }

    fn is_skipped(&self) -> bool {
        SKIPPED_SCHEMAS.contains(&self.schema.as_str())
            || SKIPPED_TABLES
                .iter()
                .any(|(schema, name)| self.schema == *schema && self.name == *name)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Which tables to export.
#[derive(Debug, Clone, Default)]
pub struct TableSelection {
    /// Explicit tables.
    pub tables: Vec<TableRef>,
    /// Every base table of these schemas.
    pub databases: Vec<String>,
    /// Every base table on the server.
    pub all_databases: bool,
}

impl TableSelection {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.databases.is_empty() && !self.all_databases
    }

    /// Merge explicit tables with those discovered on the server, dropping
    /// duplicates and log tables. The result is sorted.
    pub fn resolve(&self, discovered: Vec<TableRef>) -> Vec<TableRef> {
        self.tables
            .iter()
            .cloned()
            .chain(discovered)
            .filter(|t| !t.is_skipped())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Query the server for every base table the selection names.
pub async fn list_tables(conn: &mut Conn, selection: &TableSelection) -> Result<Vec<TableRef>> {
    let discovered: Vec<(String, String)> = if selection.all_databases {
        conn.query(
            "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE'",
        )
        .await?
    } else if !selection.databases.is_empty() {
        let placeholders = vec!["?"; selection.databases.len()].join(", ");
        let params: Vec<Value> = selection
            .databases
            .iter()
            .map(|d| Value::from(d.as_str()))
            .collect();
        conn.exec(
            format!(
                "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA IN ({placeholders})"
            ),
            Params::Positional(params),
        )
        .await?
    } else {
        Vec::new()
    };

    Ok(selection.resolve(
        discovered
            .into_iter()
            .map(|(schema, name)| TableRef::new(schema, name))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_ref() {
        assert_eq!(
            TableRef::parse("sakila.city").unwrap(),
            TableRef::new("sakila", "city")
        );
        assert_eq!(
            TableRef::parse(" app.events.2024 ").unwrap(),
            TableRef::new("app", "events.2024")
        );
        assert!(TableRef::parse("city").is_err());
        assert!(TableRef::parse(".city").is_err());
        assert!(TableRef::parse("sakila.").is_err());
    }

    #[test]
    fn test_resolve_merges_and_sorts() {
        let selection = TableSelection {
            tables: vec![
                TableRef::new("sakila", "film"),
                TableRef::new("app", "users"),
            ],
            databases: vec!["sakila".into()],
            all_databases: false,
        };
        let resolved = selection.resolve(vec![
            TableRef::new("sakila", "film"),
            TableRef::new("sakila", "city"),
        ]);
        assert_eq!(
            resolved,
            vec![
                TableRef::new("app", "users"),
                TableRef::new("sakila", "city"),
                TableRef::new("sakila", "film"),
            ]
        );
    }

    #[test]
    fn test_resolve_skips_log_tables() {
        let selection = TableSelection {
            all_databases: true,
            ..Default::default()
        };
        let resolved = selection.resolve(vec![
            TableRef::new("mysql", "slow_log"),
            TableRef::new("mysql", "general_log"),
            TableRef::new("mysql", "user"),
            TableRef::new("performance_schema", "threads"),
        ]);
        assert_eq!(resolved, vec![TableRef::new("mysql", "user")]);
    }

    #[test]
    fn test_empty_selection() {
        assert!(TableSelection::default().is_empty());
        assert!(!TableSelection {
            all_databases: true,
            ..Default::default()
        }
        .is_empty());
    }
}
