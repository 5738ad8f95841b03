//! TOML configuration file.
//!
//! ```toml
//! [client]
//! user = "backup"
//! password = "secret"
//! host = "db.internal"
//! port = 3306
//!
//! [dump]
//! destination = "/backups/nightly"
//! threads = 8
//! chunk-size = 50000
//! databases = ["sakila"]
//! compress = true
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub client: ClientSection,

    #[serde(default)]
    pub dump: DumpSection,
}

/// Connection settings, named like the `mysql` client's option file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
}

/// Dump options, keyed by their command line flag names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct DumpSection {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub databases: Vec<String>,
    pub all_databases: Option<bool>,
    pub destination: Option<PathBuf>,
    pub threads: Option<usize>,
    pub chunk_size: Option<u64>,
    pub output_chunk_size: Option<u64>,
    pub channel_buffer_size: Option<usize>,
    pub lock_tables: Option<bool>,
    pub consistent: Option<bool>,
    pub isolation_level: Option<String>,
    pub tables_without_uniquekey: Option<String>,
    pub get_master_status: Option<bool>,
    pub get_slave_status: Option<bool>,
    pub add_drop_table: Option<bool>,
    pub skip_use_database: Option<bool>,
    pub compress: Option<bool>,
    pub compress_level: Option<u32>,
    pub status_interval: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_config() {
        let toml_str = r#"
[client]
user = "backup"
password = "secret"
port = 3307

[dump]
destination = "/backups"
threads = 4
chunk-size = 500
tables = ["sakila.city", "sakila.film"]
lock-tables = false
isolation-level = "READ COMMITTED"
tables-without-uniquekey = "single-chunk"
"#;

        let config = ConfigFile::parse(toml_str).unwrap();
        assert_eq!(config.client.user.as_deref(), Some("backup"));
        assert_eq!(config.client.port, Some(3307));
        assert_eq!(config.client.host, None);
        assert_eq!(config.dump.destination, Some(PathBuf::from("/backups")));
        assert_eq!(config.dump.threads, Some(4));
        assert_eq!(config.dump.chunk_size, Some(500));
        assert_eq!(config.dump.tables.len(), 2);
        assert_eq!(config.dump.lock_tables, Some(false));
        assert_eq!(
            config.dump.tables_without_uniquekey.as_deref(),
            Some("single-chunk")
        );
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = ConfigFile::parse("").unwrap();
        assert!(config.client.user.is_none());
        assert!(config.dump.tables.is_empty());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(ConfigFile::parse("[dump]\nthreds = 4\n").is_err());
        assert!(ConfigFile::parse("[server]\nport = 1\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::load(Path::new("/nonexistent/chunk-dump.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
