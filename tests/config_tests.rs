use chunk_dump::config::{resolve, ConfigFile};
use chunk_dump::mysql::{IsolationLevel, LockMode, RunMode, TableRef, TablesWithoutKeyPolicy};
use chunk_dump::{ConnectionArgs, DumpArgs};
use std::path::PathBuf;
use std::time::Duration;

fn base_args() -> DumpArgs {
    DumpArgs {
        databases: vec!["sakila".to_string()],
        destination: Some(PathBuf::from("/backups")),
        execute: true,
        ..Default::default()
    }
}

#[test]
fn test_defaults() {
    let settings = resolve(&base_args(), None).unwrap();

    assert_eq!(settings.connection.host, "localhost");
    assert_eq!(settings.connection.port, 3306);
    assert_eq!(settings.connection.user, "root");
    assert_eq!(settings.connection.password, None);

    let options = settings.options;
    assert_eq!(options.threads, 1);
    assert_eq!(options.chunk_size, 1000);
    assert_eq!(options.output_chunk_size, 1000);
    assert_eq!(options.queue_capacity, 1000);
    assert_eq!(options.tables_without_key, TablesWithoutKeyPolicy::Error);
    assert_eq!(options.lock_mode, LockMode::PerTable);
    assert!(options.consistent);
    assert_eq!(options.isolation, IsolationLevel::RepeatableRead);
    assert!(options.capture_primary_status);
    assert!(!options.capture_replica_status);
    assert_eq!(options.compression, None);
    assert_eq!(options.mode, RunMode::Execute);
    assert_eq!(options.status_interval, Duration::from_secs(1));
}

#[test]
fn test_cli_overrides_file_overrides_defaults() {
    let file = ConfigFile::parse(
        r#"
[client]
host = "db.internal"
user = "backup"
password = "from-file"

[dump]
threads = 4
chunk-size = 500
compress = true
compress-level = 6
"#,
    )
    .unwrap();
    let args = DumpArgs {
        connection: ConnectionArgs {
            mysql_user: Some("operator".to_string()),
            ..Default::default()
        },
        threads: Some(8),
        ..base_args()
    };

    let settings = resolve(&args, Some(file)).unwrap();
    assert_eq!(settings.connection.host, "db.internal");
    assert_eq!(settings.connection.user, "operator");
    assert_eq!(settings.connection.password.as_deref(), Some("from-file"));
    assert_eq!(settings.options.threads, 8);
    assert_eq!(settings.options.chunk_size, 500);
    assert_eq!(settings.options.output_chunk_size, 500);
    assert_eq!(settings.options.compression, Some(6));
}

#[test]
fn test_selection_from_file() {
    let file = ConfigFile::parse(
        r#"
[dump]
tables = ["sakila.city", "app.users"]
destination = "/from-file"
"#,
    )
    .unwrap();
    let args = DumpArgs {
        dry_run: true,
        ..Default::default()
    };

    let settings = resolve(&args, Some(file)).unwrap();
    assert_eq!(
        settings.selection.tables,
        vec![TableRef::new("sakila", "city"), TableRef::new("app", "users")]
    );
    assert_eq!(settings.options.destination, PathBuf::from("/from-file"));
    assert_eq!(settings.options.mode, RunMode::DryRun);
}

#[test]
fn test_all_databases_uses_global_lock() {
    let args = DumpArgs {
        databases: Vec::new(),
        all_databases: true,
        ..base_args()
    };
    let settings = resolve(&args, None).unwrap();
    assert_eq!(settings.options.lock_mode, LockMode::Global);

    let args = DumpArgs {
        lock_tables: Some(false),
        consistent: Some(false),
        ..args
    };
    let settings = resolve(&args, None).unwrap();
    assert_eq!(settings.options.lock_mode, LockMode::None);
}

#[test]
fn test_mode_flags() {
    let neither = DumpArgs {
        execute: false,
        ..base_args()
    };
    assert!(resolve(&neither, None).is_err());

    let both = DumpArgs {
        dry_run: true,
        ..base_args()
    };
    let err = resolve(&both, None).unwrap_err();
    assert!(err.to_string().contains("mutually exclusive"));
}

#[test]
fn test_validation_errors() {
    let cases = [
        DumpArgs {
            destination: None,
            ..base_args()
        },
        DumpArgs {
            databases: Vec::new(),
            ..base_args()
        },
        DumpArgs {
            tables_without_uniquekey: Some("skip".to_string()),
            ..base_args()
        },
        DumpArgs {
            compress_level: Some(0),
            ..base_args()
        },
        DumpArgs {
            chunk_size: Some(0),
            ..base_args()
        },
        DumpArgs {
            threads: Some(0),
            ..base_args()
        },
        DumpArgs {
            lock_tables: Some(false),
            ..base_args()
        },
        DumpArgs {
            isolation_level: Some("READ COMMITTED".to_string()),
            ..base_args()
        },
        DumpArgs {
            tables: vec!["no_schema".to_string()],
            ..base_args()
        },
        DumpArgs {
            status_interval: Some("often".to_string()),
            ..base_args()
        },
    ];
    for args in cases {
        assert!(resolve(&args, None).is_err(), "{args:?} should be rejected");
    }
}

#[test]
fn test_read_committed_allowed_without_consistency() {
    let args = DumpArgs {
        isolation_level: Some("read-committed".to_string()),
        consistent: Some(false),
        ..base_args()
    };
    let settings = resolve(&args, None).unwrap();
    assert_eq!(settings.options.isolation, IsolationLevel::ReadCommitted);
}

#[test]
fn test_config_file_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("dump.toml");
    std::fs::write(&path, "[dump]\nstatus-interval = \"250ms\"\n").unwrap();

    let file = ConfigFile::load(&path).unwrap();
    let settings = resolve(&base_args(), Some(file)).unwrap();
    assert_eq!(settings.options.status_interval, Duration::from_millis(250));
}
