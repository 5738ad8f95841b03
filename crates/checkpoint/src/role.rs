//! Which server a replication checkpoint describes.

use serde::{Deserialize, Serialize};

/// The server role a checkpoint was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationRole {
    /// Binary log coordinates of the dumped server itself.
    Primary,

    /// Position of the dumped server's replication thread in its source's
    /// binary log.
    Replica,
}

impl ReplicationRole {
    /// Short name used as the file name prefix (`master-data.sql`,
    /// `slave-data.sql`) and in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationRole::Primary => "master",
            ReplicationRole::Replica => "slave",
        }
    }

    pub fn sql_file_name(&self) -> String {
        format!("{}-data.sql", self.as_str())
    }

    pub fn json_file_name(&self) -> String {
        format!("{}-data.json", self.as_str())
    }
}

impl std::fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
