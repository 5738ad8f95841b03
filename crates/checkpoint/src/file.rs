//! JSON companion of a status file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Checkpoint, ReplicationRole};

/// Contents of `<role>-data.json`.
///
/// ```json
/// {
///     "database_type": "mysql-binlog",
///     "role": "Primary",
///     "position": "binlog.000042:157",
///     "checkpoint": { "file": "binlog.000042", "position": 157, ... },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
///
/// `position` is the one-line form for scripts that only need the
/// coordinates; `checkpoint` holds the full typed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub database_type: String,
    pub role: ReplicationRole,
    pub position: String,
    pub checkpoint: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    pub fn new<C: Checkpoint>(checkpoint: &C, role: ReplicationRole) -> anyhow::Result<Self> {
        Ok(Self {
            database_type: C::DATABASE_TYPE.to_string(),
            role,
            position: checkpoint.to_cli_string(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Decode the typed checkpoint, refusing files written for another
    /// checkpoint type.
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.database_type != C::DATABASE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::DATABASE_TYPE,
                self.database_type
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }

    pub fn role(&self) -> ReplicationRole {
        self.role
    }
}
