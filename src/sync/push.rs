use std::fmt;
use std::sync::Arc;

use super::connectivity::Connectivity;
use super::error::SyncError;
use super::transport::SyncTransport;
use crate::db::LocalStore;
use crate::models::SyncStatus;
use crate::protocol::{CollectionRecord, SyncBatch, TreeRecord};

/// What a push attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// No connectivity, nothing read or sent.
    Offline,
    /// Nothing pending, no network call made.
    NothingPending,
    /// The authority acknowledged a batch of this size.
    Pushed { sites: usize, observations: usize },
    /// The attempt failed; every flag is unchanged.
    Failed(String),
}

impl fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushOutcome::Offline => write!(f, "skipped (offline)"),
            PushOutcome::NothingPending => write!(f, "nothing to push"),
            PushOutcome::Pushed {
                sites,
                observations,
            } => write!(f, "pushed {} tree(s), {} collection(s)", sites, observations),
            PushOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Sends pending local records to the authority and acknowledges them.
#[derive(Clone)]
pub struct Pusher {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    connectivity: Arc<dyn Connectivity>,
}

impl Pusher {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
        }
    }

    /// Best-effort push: failures are logged and reported, never returned.
    pub async fn push(&self) -> PushOutcome {
        match self.try_push().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Push failed, records stay pending: {}", e);
                PushOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn try_push(&self) -> Result<PushOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Ok(PushOutcome::Offline);
        }

        let sites = self.store.sites().list_by_status(SyncStatus::Pending).await?;
        let observations = self
            .store
            .observations()
            .list_by_status(SyncStatus::Pending)
            .await?;

        if sites.is_empty() && observations.is_empty() {
            tracing::debug!("Nothing pending to push");
            return Ok(PushOutcome::NothingPending);
        }

        let batch = SyncBatch {
            trees: sites.iter().map(TreeRecord::from).collect(),
            collections: observations.iter().map(CollectionRecord::from).collect(),
        };

        self.transport.ingest(&batch).await?;

        // Only the records captured above, and only while they still hold
        // what was sent. Anything written during the request stays pending.
        let (acked_sites, acked_observations) =
            self.store.acknowledge(&sites, &observations).await?;
        if acked_sites < sites.len() || acked_observations < observations.len() {
            tracing::debug!(
                trees = sites.len() - acked_sites,
                collections = observations.len() - acked_observations,
                "Records changed during push, left pending"
            );
        }

        tracing::info!(
            trees = sites.len(),
            collections = observations.len(),
            "Pushed pending records"
        );

        Ok(PushOutcome::Pushed {
            sites: sites.len(),
            observations: observations.len(),
        })
    }
}
