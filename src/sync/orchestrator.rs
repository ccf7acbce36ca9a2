//! Decides when push and pull run.
//!
//! Startup runs pull then push so a fresh replica sees the authority's
//! sites before sending its own. Coming back online runs push then pull so
//! field work reaches the authority first. Only one sequence runs at a
//! time; a trigger that arrives meanwhile is dropped and reported as
//! [`SequenceOutcome::Skipped`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use super::connectivity::Connectivity;
use super::pull::{PullOutcome, Puller};
use super::push::{PushOutcome, Pusher};
use super::transport::SyncTransport;
use crate::db::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Online,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Online => write!(f, "online"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub trigger: Trigger,
    pub push: PushOutcome,
    pub pull: PullOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    Completed(SyncReport),
    /// Another sequence was already running.
    Skipped,
}

pub struct SyncOrchestrator {
    pusher: Pusher,
    puller: Puller,
    in_flight: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            pusher: Pusher::new(store.clone(), transport.clone(), connectivity.clone()),
            puller: Puller::new(store, transport, connectivity),
            in_flight: Mutex::new(()),
        }
    }

    pub fn pusher(&self) -> &Pusher {
        &self.pusher
    }

    pub fn puller(&self) -> &Puller {
        &self.puller
    }

    pub async fn on_startup(&self) -> SequenceOutcome {
        self.trigger(Trigger::Startup).await
    }

    pub async fn on_online(&self) -> SequenceOutcome {
        self.trigger(Trigger::Online).await
    }

    pub async fn trigger(&self, trigger: Trigger) -> SequenceOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!(%trigger, "Sync already running, trigger skipped");
            return SequenceOutcome::Skipped;
        };

        let (push, pull) = match trigger {
            Trigger::Startup => {
                let pull = self.puller.pull().await;
                let push = self.pusher.push().await;
                (push, pull)
            }
            Trigger::Online => {
                let push = self.pusher.push().await;
                let pull = self.puller.pull().await;
                (push, pull)
            }
        };

        tracing::info!(%trigger, %push, %pull, "Sync sequence finished");
        SequenceOutcome::Completed(SyncReport {
            trigger,
            push,
            pull,
        })
    }

    /// Runs the online sequence on every offline -> online transition until
    /// the sender side is dropped.
    pub async fn run(self: Arc<Self>, mut online: watch::Receiver<bool>) {
        while online.changed().await.is_ok() {
            let is_online = *online.borrow_and_update();
            if is_online {
                let orchestrator = self.clone();
                // Spawned so a burst of transitions hits the single-flight
                // guard instead of queueing behind the running sequence.
                tokio::spawn(async move {
                    orchestrator.on_online().await;
                });
            }
        }
        tracing::debug!("Connectivity channel closed, orchestrator stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timestamp;
    use crate::models::{NewObservation, NewSite, SyncStatus};
    use crate::protocol::{RemoteTree, Snapshot};
    use crate::sync::connectivity::{ConnectivityMonitor, StaticConnectivity};
    use crate::sync::transport::mock::MockTransport;
    use tempfile::TempDir;

    struct TestContext {
        store: LocalStore,
        transport: Arc<MockTransport>,
        _temp_dir: TempDir,
    }

    impl TestContext {
        async fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let store = LocalStore::open(&temp_dir.path().join("replica.db"))
                .await
                .unwrap();
            Self {
                store,
                transport: Arc::new(MockTransport::new()),
                _temp_dir: temp_dir,
            }
        }

        fn orchestrator(&self, connectivity: Arc<dyn Connectivity>) -> Arc<SyncOrchestrator> {
            Arc::new(SyncOrchestrator::new(
                self.store.clone(),
                self.transport.clone(),
                connectivity,
            ))
        }
    }

    #[tokio::test]
    async fn test_startup_pulls_before_pushing() {
        let ctx = TestContext::new().await;
        // The authority already knows T-1 with other coordinates; the local
        // pending copy must survive and then be pushed.
        ctx.transport.set_snapshot(Snapshot {
            trees: vec![RemoteTree {
                tree_id: "T-1".to_string(),
                lat: 9.0,
                lng: 9.0,
                note: None,
                created_at: timestamp::now(),
            }],
            collections: vec![],
        });
        ctx.store
            .sites()
            .create(&NewSite::new("T-1", 1.0, 2.0))
            .await
            .unwrap();

        let outcome = ctx
            .orchestrator(Arc::new(StaticConnectivity(true)))
            .on_startup()
            .await;

        let SequenceOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(report.trigger, Trigger::Startup);
        let PullOutcome::Merged(summary) = report.pull else {
            panic!("unexpected pull: {:?}", report.pull);
        };
        assert_eq!(summary.sites_protected, 1);
        assert_eq!(
            report.push,
            PushOutcome::Pushed {
                sites: 1,
                observations: 0
            }
        );
        assert_eq!(ctx.transport.received()[0].trees[0].lat, 1.0);
    }

    #[tokio::test]
    async fn test_online_pushes_before_pulling() {
        let ctx = TestContext::new().await;
        ctx.store
            .observations()
            .create(&NewObservation::new("T-1", 2, 0.7))
            .await
            .unwrap();

        let outcome = ctx
            .orchestrator(Arc::new(StaticConnectivity(true)))
            .on_online()
            .await;

        let SequenceOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(
            report.push,
            PushOutcome::Pushed {
                sites: 0,
                observations: 1
            }
        );
        assert!(matches!(report.pull, PullOutcome::Merged(_)));
        assert_eq!(ctx.transport.ingest_calls(), 1);
        assert_eq!(ctx.transport.snapshot_calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_sequence_touches_nothing() {
        let ctx = TestContext::new().await;
        ctx.store
            .sites()
            .create(&NewSite::new("T-1", 1.0, 2.0))
            .await
            .unwrap();

        let outcome = ctx
            .orchestrator(Arc::new(StaticConnectivity(false)))
            .on_startup()
            .await;

        let SequenceOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(report.push, PushOutcome::Offline);
        assert_eq!(report.pull, PullOutcome::Offline);
        assert_eq!(ctx.transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let ctx = TestContext::new().await;
        let orchestrator = ctx.orchestrator(Arc::new(StaticConnectivity(true)));
        let gate = ctx.transport.hold();

        let running = orchestrator.clone();
        let first = tokio::spawn(async move { running.on_startup().await });

        while ctx.transport.snapshot_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(orchestrator.on_online().await, SequenceOutcome::Skipped);

        gate.notify_one();
        assert!(matches!(
            first.await.unwrap(),
            SequenceOutcome::Completed(_)
        ));
        // The skipped trigger made no calls of its own.
        assert_eq!(ctx.transport.snapshot_calls(), 1);

        // Once idle the guard admits the next trigger.
        assert!(matches!(
            orchestrator.on_online().await,
            SequenceOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let ctx = TestContext::new().await;
        ctx.store
            .sites()
            .create(&NewSite::new("T-1", 1.0, 2.0))
            .await
            .unwrap();
        ctx.transport.set_failing(true);

        let outcome = ctx
            .orchestrator(Arc::new(StaticConnectivity(true)))
            .on_online()
            .await;

        let SequenceOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert!(matches!(report.push, PushOutcome::Failed(_)));
        assert!(matches!(report.pull, PullOutcome::Failed(_)));
        let site = ctx.store.sites().get_by_tree_id("T-1").await.unwrap().unwrap();
        assert_eq!(site.status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_reacts_to_online_transitions() {
        let ctx = TestContext::new().await;
        ctx.store
            .sites()
            .create(&NewSite::new("T-1", 1.0, 2.0))
            .await
            .unwrap();

        let monitor = ConnectivityMonitor::new(false);
        let orchestrator = ctx.orchestrator(Arc::new(monitor.clone()));
        let handle = tokio::spawn(orchestrator.run(monitor.subscribe()));

        // Going offline again is not a trigger.
        monitor.set_online(false);
        tokio::task::yield_now().await;
        assert_eq!(ctx.transport.calls(), 0);

        monitor.set_online(true);
        for _ in 0..1000 {
            if ctx.store.pending_counts().await.unwrap() == (0, 0) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(ctx.store.pending_counts().await.unwrap(), (0, 0));
        assert_eq!(ctx.transport.ingest_calls(), 1);

        handle.abort();
    }
}
