use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::sync_status::SyncStatus;
use super::{normalize_note, timestamp};

/// A single tapping event recorded against a site.
///
/// There is no external identifier: across replicas an observation is
/// identified by its site and (approximately) its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    /// Site this observation belongs to. Not enforced; orphans are kept.
    pub tree_id: String,
    pub cuts: u32,
    pub milk_amount: f64,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub tree_id: String,
    pub cuts: u32,
    pub milk_amount: f64,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: SyncStatus,
}

impl NewObservation {
    pub fn new(tree_id: impl Into<String>, cuts: u32, milk_amount: f64) -> Self {
        Self {
            tree_id: tree_id.into().trim().to_string(),
            cuts,
            milk_amount,
            note: None,
            timestamp: timestamp::now(),
            status: SyncStatus::Pending,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = normalize_note(Some(note.into()));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = status;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tree_id.is_empty() {
            return Err("tree id must not be empty".to_string());
        }
        if !self.milk_amount.is_finite() || self.milk_amount < 0.0 {
            return Err(format!(
                "milk amount must be a non-negative number, got {}",
                self.milk_amount
            ));
        }
        Ok(())
    }
}

/// Partial update applied by surrogate key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationUpdate {
    pub cuts: Option<u32>,
    pub milk_amount: Option<f64>,
    pub note: Option<Option<String>>,
    pub status: Option<SyncStatus>,
}

impl ObservationUpdate {
    pub fn is_empty(&self) -> bool {
        self.cuts.is_none()
            && self.milk_amount.is_none()
            && self.note.is_none()
            && self.status.is_none()
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} cut{}, {:.2} milk",
            self.id,
            timestamp::format(&self.timestamp),
            self.cuts,
            if self.cuts == 1 { "" } else { "s" },
            self.milk_amount
        )?;
        if let Some(note) = &self.note {
            write!(f, " ({})", note)?;
        }
        if !self.status.is_synced() {
            write!(f, " [pending]")?;
        }
        Ok(())
    }
}
