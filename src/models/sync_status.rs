use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether the authority has acknowledged a record's current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Created or changed locally, not yet acknowledged.
    #[default]
    Pending,
    /// Acknowledged by the authority (pushed, or materialized by a pull).
    Synced,
}

impl SyncStatus {
    /// Column value stored in the `synced` column.
    pub fn as_flag(self) -> i64 {
        match self {
            SyncStatus::Pending => 0,
            SyncStatus::Synced => 1,
        }
    }

    pub fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            SyncStatus::Pending
        } else {
            SyncStatus::Synced
        }
    }

    pub fn is_synced(self) -> bool {
        self == SyncStatus::Synced
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            _ => Err(format!(
                "Invalid sync status '{}'. Valid options: pending, synced",
                s
            )),
        }
    }
}
