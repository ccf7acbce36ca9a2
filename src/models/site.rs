use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::sync_status::SyncStatus;
use super::{normalize_note, timestamp};

/// A registered tappable tree, as stored in the local replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Replica-local surrogate key. Never compared across replicas.
    pub id: i64,
    /// User-assigned identifier, e.g. "T-101". The cross-replica join key.
    pub tree_id: String,
    pub lat: f64,
    pub lng: f64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: SyncStatus,
}

/// A site that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub tree_id: String,
    pub lat: f64,
    pub lng: f64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: SyncStatus,
}

impl NewSite {
    pub fn new(tree_id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            tree_id: tree_id.into().trim().to_string(),
            lat,
            lng,
            note: None,
            created_at: timestamp::now(),
            status: SyncStatus::Pending,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = normalize_note(Some(note.into()));
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
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
        validate_coordinates(self.lat, self.lng)
    }
}

/// Partial update applied by surrogate key. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteUpdate {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// `Some(None)` clears the note.
    pub note: Option<Option<String>>,
    pub status: Option<SyncStatus>,
}

impl SiteUpdate {
    pub fn is_empty(&self) -> bool {
        self.lat.is_none() && self.lng.is_none() && self.note.is_none() && self.status.is_none()
    }
}

pub(crate) fn validate_coordinates(lat: f64, lng: f64) -> Result<(), String> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {} is out of range", lat));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(format!("longitude {} is out of range", lng));
    }
    Ok(())
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.tree_id)?;
        writeln!(f, "{}", "=".repeat(self.tree_id.len()))?;
        writeln!(f, "Location: {:.5}, {:.5}", self.lat, self.lng)?;
        if let Some(note) = &self.note {
            writeln!(f, "Note: {}", note)?;
        }
        writeln!(f, "Registered: {}", timestamp::format(&self.created_at))?;
        writeln!(f, "Status: {}", self.status)?;
        Ok(())
    }
}
