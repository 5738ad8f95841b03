//! Error type shared by every stage of a dump.

use thiserror::Error;

/// Any failure during a dump. All of them end the run.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to connect to MySQL at {target}: {message}")]
    Connection { target: String, message: String },

    #[error("Failed to read metadata for {table}: {message}")]
    Metadata { table: String, message: String },

    #[error("Table {0} has no single-column integer primary key or NOT NULL unique key to chunk on")]
    NoChunkingKey(String),

    #[error("Failed to plan chunks for {table}: {message}")]
    Planning { table: String, message: String },

    #[error("Consistency protocol failed: {0}")]
    Consistency(String),

    #[error("Failed to extract rows from {table}: {message}")]
    Extraction { table: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk queue closed while chunks were still being planned")]
    QueueClosed,

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    MySql(#[from] mysql_async::Error),
}

impl DumpError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        DumpError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn metadata(table: impl Into<String>, message: impl ToString) -> Self {
        DumpError::Metadata {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn planning(table: impl Into<String>, message: impl ToString) -> Self {
        DumpError::Planning {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn extraction(table: impl Into<String>, message: impl ToString) -> Self {
        DumpError::Extraction {
            table: table.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DumpError>;
