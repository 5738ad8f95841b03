//! End-to-end dump against a MySQL server running in Docker.
//!
//! Run with `cargo test -p chunk-dump-mysql-source -- --ignored`.

use anyhow::{Context, Result};
use chunk_dump_mysql_source::testing::MySQLContainer;
use chunk_dump_mysql_source::{
    run_dump, DumpOptions, MySqlConnector, RunMode, TableSelection, TablesWithoutKeyPolicy,
};
use mysql_types::{parse_tuple, SqlValue};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Test port that doesn't conflict with standard MySQL port
const TEST_PORT: u16 = 13311;

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Every INSERT tuple in the plain data files of `table`.
fn exported_rows(dir: &std::path::Path, table: &str) -> Result<Vec<Vec<SqlValue>>> {
    let mut rows = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        if !name.starts_with(&format!("{table}-thread")) {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        // Tuples start at the beginning of a line; strings with embedded
        // newlines are escaped, so a line is never a partial tuple.
        for line in content.lines().filter(|l| l.starts_with('(')) {
            rows.push(parse_tuple(line).with_context(|| format!("bad tuple: {line}"))?);
        }
    }
    Ok(rows)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_consistent_dump_of_live_server() -> Result<()> {
    init_logging();

    let container = MySQLContainer::new("chunk-dump-e2e", TEST_PORT);
    container.start()?;
    container.wait_until_ready(90).await?;

    let mut setup = vec![
        "CREATE DATABASE shop".to_string(),
        "CREATE TABLE shop.orders (\
            id INT NOT NULL PRIMARY KEY, \
            note VARCHAR(100), \
            amount DECIMAL(10,2), \
            created_at DATETIME(6)\
         ) ENGINE=InnoDB"
            .to_string(),
        "CREATE TABLE shop.audit (message TEXT) ENGINE=InnoDB".to_string(),
        "INSERT INTO shop.audit VALUES ('a'), ('b')".to_string(),
    ];
    for id in 1..=250 {
        setup.push(format!(
            "INSERT INTO shop.orders VALUES ({id}, 'it''s\\nline {id}', {id}.25, '2024-03-01 10:00:00.000123')"
        ));
    }
    let statements: Vec<&str> = setup.iter().map(String::as_str).collect();
    container.execute(&statements).await?;
    info!("Seeded test data");

    let tmp = tempfile::TempDir::new()?;
    let options = DumpOptions {
        destination: tmp.path().to_path_buf(),
        threads: 3,
        chunk_size: 40,
        output_chunk_size: 25,
        tables_without_key: TablesWithoutKeyPolicy::SingleChunk,
        add_drop_table: true,
        mode: RunMode::Execute,
        ..Default::default()
    };
    let selection = TableSelection {
        databases: vec!["shop".to_string()],
        ..Default::default()
    };

    let connector = Arc::new(MySqlConnector::new(container.connection_options()));
    let summary = run_dump(connector, &selection, &options).await?;
    info!("Summary:\n{}", summary);

    let orders = summary
        .tables
        .iter()
        .find(|t| t.table == "shop.orders")
        .context("orders missing from summary")?;
    assert_eq!(orders.chunks, 7);
    assert_eq!(orders.rows, 250);

    let mut rows = exported_rows(tmp.path(), "shop.orders")?;
    rows.sort_by_key(|r| match r[0] {
        SqlValue::Int(id) => id,
        _ => i64::MAX,
    });
    assert_eq!(rows.len(), 250);
    assert_eq!(rows[0][0], SqlValue::Int(1));
    assert_eq!(rows[0][1], SqlValue::from("it's\nline 1"));
    assert_eq!(rows[0][2].to_literal(), "1.25");
    assert_eq!(rows[0][3].to_literal(), "'2024-03-01 10:00:00.000123'");

    assert_eq!(exported_rows(tmp.path(), "shop.audit")?.len(), 2);
    assert!(tmp.path().join("shop.orders-definition.sql").exists());

    let master = std::fs::read_to_string(tmp.path().join("master-data.sql"))?;
    assert!(master.contains("-- CHANGE MASTER TO MASTER_LOG_FILE='mysql-bin."));

    container.stop()?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dry_run_against_live_server() -> Result<()> {
    init_logging();

    let container = MySQLContainer::new("chunk-dump-e2e-dry", TEST_PORT + 1);
    container.start()?;
    container.wait_until_ready(90).await?;
    container
        .execute(&[
            "CREATE DATABASE sakila",
            "CREATE TABLE sakila.city (city_id SMALLINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY, city VARCHAR(50) NOT NULL)",
            "INSERT INTO sakila.city (city) SELECT 'x' FROM information_schema.columns LIMIT 600",
        ])
        .await?;

    let tmp = tempfile::TempDir::new()?;
    let options = DumpOptions {
        destination: tmp.path().to_path_buf(),
        mode: RunMode::DryRun,
        ..Default::default()
    };
    let selection = TableSelection {
        databases: vec!["sakila".to_string()],
        ..Default::default()
    };
    let connector = Arc::new(MySqlConnector::new(container.connection_options()));
    let summary = run_dump(connector, &selection, &options).await?;

    assert_eq!(summary.to_string(), "   1 -> sakila.city\n");
    container.stop()?;
    Ok(())
}
