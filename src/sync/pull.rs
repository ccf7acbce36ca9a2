use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;

use super::connectivity::Connectivity;
use super::error::SyncError;
use super::transport::SyncTransport;
use crate::db::{LocalStore, ObservationRepository, SiteRepository};
use crate::models::normalize_note;
use crate::protocol::Snapshot;

/// Two observations of the same tree this close together are the same
/// collection event.
pub const DEDUP_WINDOW: TimeDelta = TimeDelta::seconds(2);

/// Counts of what one merge did locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub sites_inserted: usize,
    pub sites_updated: usize,
    /// Remote sites left alone because the local copy has unpushed edits.
    pub sites_protected: usize,
    pub observations_inserted: usize,
    pub observations_skipped: usize,
}

impl PullSummary {
    pub fn changed(&self) -> bool {
        self.sites_inserted + self.sites_updated + self.observations_inserted > 0
    }
}

/// What a pull attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Offline,
    Merged(PullSummary),
    Failed(String),
}

impl fmt::Display for PullOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullOutcome::Offline => write!(f, "skipped (offline)"),
            PullOutcome::Merged(s) => write!(
                f,
                "{} new tree(s), {} updated, {} kept local; {} new collection(s), {} already present",
                s.sites_inserted,
                s.sites_updated,
                s.sites_protected,
                s.observations_inserted,
                s.observations_skipped
            ),
            PullOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Fetches the authority's records and merges them into the local store.
#[derive(Clone)]
pub struct Puller {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    connectivity: Arc<dyn Connectivity>,
}

impl Puller {
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

    /// Best-effort pull: failures are logged and reported, never returned.
    pub async fn pull(&self) -> PullOutcome {
        match self.try_pull().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Pull failed, local store unchanged: {}", e);
                PullOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn try_pull(&self) -> Result<PullOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Ok(PullOutcome::Offline);
        }

        let snapshot = self.transport.snapshot().await?;
        let summary = self.merge(&snapshot).await?;

        tracing::info!(
            inserted = summary.sites_inserted,
            updated = summary.sites_updated,
            protected = summary.sites_protected,
            collections = summary.observations_inserted,
            "Pulled authority records"
        );

        Ok(PullOutcome::Merged(summary))
    }

    /// Applies a snapshot in one transaction. Pending local sites win over
    /// the authority; synced ones take its values.
    pub async fn merge(&self, snapshot: &Snapshot) -> Result<PullSummary, SyncError> {
        let mut summary = PullSummary::default();
        let mut tx = self.store.begin().await?;

        for remote in &snapshot.trees {
            match SiteRepository::find_by_tree_id_in(&mut tx, &remote.tree_id).await? {
                None => {
                    SiteRepository::insert_in(&mut tx, &remote.to_new_site()).await?;
                    summary.sites_inserted += 1;
                }
                Some(local) if local.status.is_synced() => {
                    let note = normalize_note(remote.note.clone());
                    if local.lat != remote.lat || local.lng != remote.lng || local.note != note {
                        SiteRepository::overwrite_location_in(
                            &mut tx,
                            local.id,
                            remote.lat,
                            remote.lng,
                            note.as_deref(),
                        )
                        .await?;
                        summary.sites_updated += 1;
                    }
                }
                Some(local) => {
                    tracing::debug!(tree_id = %local.tree_id, "Keeping unpushed local site");
                    summary.sites_protected += 1;
                }
            }
        }

        for remote in &snapshot.collections {
            let existing = ObservationRepository::find_near_in(
                &mut tx,
                &remote.tree_id,
                &remote.timestamp,
                DEDUP_WINDOW,
            )
            .await?;
            match existing {
                Some(local) => {
                    tracing::debug!(
                        tree_id = %remote.tree_id,
                        local_id = local.id,
                        "Collection already present"
                    );
                    summary.observations_skipped += 1;
                }
                None => {
                    ObservationRepository::insert_in(&mut tx, &remote.to_new_observation())
                        .await?;
                    summary.observations_inserted += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(summary)
    }
}
