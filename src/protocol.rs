//! JSON bodies exchanged between replicas and the authority.
//!
//! ```text
//! POST /api/sync   { trees: [TreeRecord], collections: [CollectionRecord] }
//!               -> { success: true } | 500 { success: false, error }
//! GET  /api/sync -> { trees: [RemoteTree], collections: [CollectionRecord] }
//! ```
//!
//! Records carry no surrogate keys: trees are matched by `tree_id`,
//! collections by `tree_id` plus timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{NewObservation, NewSite, Observation, Site, SyncStatus};

/// Path of the ingest and read endpoints.
pub const SYNC_PATH: &str = "/api/sync";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub tree_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub tree_id: String,
    pub cuts: u32,
    pub milk_amount: f64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A tree as held by the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTree {
    pub tree_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(with = "iso_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Ingest request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    #[serde(default)]
    pub trees: Vec<TreeRecord>,
    #[serde(default)]
    pub collections: Vec<CollectionRecord>,
}

impl SyncBatch {
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty() && self.collections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Read response body: the authority's full record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub trees: Vec<RemoteTree>,
    #[serde(default)]
    pub collections: Vec<CollectionRecord>,
}

impl From<&Site> for TreeRecord {
    fn from(site: &Site) -> Self {
        Self {
            tree_id: site.tree_id.clone(),
            lat: site.lat,
            lng: site.lng,
            note: site.note.clone(),
        }
    }
}

impl From<&Observation> for CollectionRecord {
    fn from(observation: &Observation) -> Self {
        Self {
            tree_id: observation.tree_id.clone(),
            cuts: observation.cuts,
            milk_amount: observation.milk_amount,
            note: observation.note.clone(),
            timestamp: observation.timestamp,
        }
    }
}

impl RemoteTree {
    /// Local copy of an authority tree, already acknowledged.
    pub fn to_new_site(&self) -> NewSite {
        let site = NewSite::new(&self.tree_id, self.lat, self.lng)
            .with_created_at(self.created_at)
            .with_status(SyncStatus::Synced);
        match &self.note {
            Some(note) => site.with_note(note),
            None => site,
        }
    }
}

impl CollectionRecord {
    /// Local copy of an authority collection, already acknowledged.
    pub fn to_new_observation(&self) -> NewObservation {
        let observation = NewObservation::new(&self.tree_id, self.cuts, self.milk_amount)
            .with_timestamp(self.timestamp)
            .with_status(SyncStatus::Synced);
        match &self.note {
            Some(note) => observation.with_note(note),
            None => observation,
        }
    }
}

/// Serde adapter writing ISO-8601 with millisecond precision and reading
/// anything [`crate::models::timestamp::parse`] accepts.
mod iso_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::models::timestamp;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp::format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}
