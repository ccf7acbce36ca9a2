//! Two replicas syncing through a real authority over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rubber_sync::db::LocalStore;
use rubber_sync::models::{timestamp, NewObservation, NewSite, SiteUpdate, SyncStatus};
use rubber_sync::server::{app_router, ApiKeyStore, AppState, AuthorityStore};
use rubber_sync::sync::{
    ConnectivityMonitor, HttpTransport, PullOutcome, PushOutcome, SequenceOutcome,
    StaticConnectivity, SyncOrchestrator, SyncTransport,
};
use tempfile::TempDir;

const API_KEY: &str = "field-key";

struct Authority {
    addr: SocketAddr,
    store: Arc<AuthorityStore>,
    _temp_dir: TempDir,
}

impl Authority {
    async fn start() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = AuthorityStore::connect(&temp_dir.path().join("authority.db"))
            .await
            .unwrap();
        let state = AppState::new(store, ApiKeyStore::default().with_key(API_KEY, "test"));
        let store = state.store.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app_router(state)).await.unwrap();
        });

        Self {
            addr,
            store,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

struct Replica {
    store: LocalStore,
    transport: Arc<HttpTransport>,
    _temp_dir: TempDir,
}

impl Replica {
    async fn new(authority: &Authority) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(&temp_dir.path().join("replica.db"))
            .await
            .unwrap();
        let transport = Arc::new(
            HttpTransport::new(
                &authority.url(),
                Some(API_KEY.to_string()),
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        Self {
            store,
            transport,
            _temp_dir: temp_dir,
        }
    }

    fn orchestrator(&self, online: bool) -> SyncOrchestrator {
        SyncOrchestrator::new(
            self.store.clone(),
            self.transport.clone(),
            Arc::new(StaticConnectivity(online)),
        )
    }

    async fn push(&self) -> PushOutcome {
        self.orchestrator(true).pusher().push().await
    }

    async fn pull(&self) -> PullOutcome {
        self.orchestrator(true).puller().pull().await
    }
}

#[tokio::test]
async fn test_site_registered_on_one_device_reaches_another() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;
    let b = Replica::new(&authority).await;

    // Give B an unrelated site first so surrogate keys diverge.
    b.store
        .sites()
        .create(&NewSite::new("T-0", 0.5, 0.5).with_status(SyncStatus::Synced))
        .await
        .unwrap();

    let registered = a
        .store
        .sites()
        .create(&NewSite::new("T-1", 1.0, 2.0))
        .await
        .unwrap();
    assert_eq!(
        a.push().await,
        PushOutcome::Pushed {
            sites: 1,
            observations: 0
        }
    );
    let on_a = a.store.sites().get(registered.id).await.unwrap().unwrap();
    assert_eq!(on_a.status, SyncStatus::Synced);

    assert!(matches!(b.pull().await, PullOutcome::Merged(_)));
    let on_b = b.store.sites().get_by_tree_id("T-1").await.unwrap().unwrap();
    assert_eq!((on_b.lat, on_b.lng), (1.0, 2.0));
    assert_eq!(on_b.status, SyncStatus::Synced);
    assert_ne!(on_b.id, on_a.id);
}

#[tokio::test]
async fn test_simultaneous_collections_are_both_kept_by_authority() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;
    let b = Replica::new(&authority).await;
    let at = timestamp::parse("2025-03-01T06:00:00Z").unwrap();

    a.store
        .observations()
        .create(&NewObservation::new("T-1", 1, 0.8).with_timestamp(at))
        .await
        .unwrap();
    b.store
        .observations()
        .create(&NewObservation::new("T-1", 1, 1.3).with_timestamp(at))
        .await
        .unwrap();

    a.push().await;
    b.push().await;

    let snapshot = authority.store.snapshot().await.unwrap();
    let mut amounts: Vec<f64> = snapshot.collections.iter().map(|c| c.milk_amount).collect();
    amounts.sort_by(|x, y| x.partial_cmp(y).unwrap());
    assert_eq!(amounts, vec![0.8, 1.3]);

    // Each device already has "its" collection at that instant; the other
    // one falls inside the dedup window and is not duplicated locally.
    a.pull().await;
    assert_eq!(a.store.observations().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pending_edit_survives_pull_then_wins_on_push() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;
    let b = Replica::new(&authority).await;

    a.store
        .sites()
        .create(&NewSite::new("T-1", 1.0, 2.0))
        .await
        .unwrap();
    a.push().await;
    b.pull().await;

    // B edits offline while A moves the tree on the authority.
    let on_b = b.store.sites().get_by_tree_id("T-1").await.unwrap().unwrap();
    b.store
        .sites()
        .update(
            on_b.id,
            &SiteUpdate {
                lat: Some(1.5),
                status: Some(SyncStatus::Pending),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let on_a = a.store.sites().get_by_tree_id("T-1").await.unwrap().unwrap();
    a.store
        .sites()
        .update(
            on_a.id,
            &SiteUpdate {
                lat: Some(3.0),
                status: Some(SyncStatus::Pending),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    a.push().await;

    // Startup on B: pull keeps the pending edit, push then overwrites.
    let outcome = b.orchestrator(true).on_startup().await;
    let SequenceOutcome::Completed(report) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    let PullOutcome::Merged(summary) = report.pull else {
        panic!("unexpected pull: {:?}", report.pull);
    };
    assert_eq!(summary.sites_protected, 1);

    let snapshot = authority.store.snapshot().await.unwrap();
    assert_eq!(snapshot.trees.len(), 1);
    assert_eq!(snapshot.trees[0].lat, 1.5);

    // A's next pull adopts the last writer's value.
    a.pull().await;
    let on_a = a.store.sites().get_by_tree_id("T-1").await.unwrap().unwrap();
    assert_eq!(on_a.lat, 1.5);
    assert_eq!(on_a.status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_offline_replica_makes_no_requests_and_no_changes() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;
    a.store
        .sites()
        .create(&NewSite::new("T-1", 1.0, 2.0))
        .await
        .unwrap();

    let outcome = a.orchestrator(false).on_online().await;
    let SequenceOutcome::Completed(report) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(report.push, PushOutcome::Offline);
    assert_eq!(report.pull, PullOutcome::Offline);

    assert_eq!(a.store.pending_counts().await.unwrap(), (1, 0));
    assert!(authority.store.snapshot().await.unwrap().trees.is_empty());
}

#[tokio::test]
async fn test_rejected_batch_leaves_records_pending() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;

    // Bypass local validation to get a record the authority refuses.
    let observation = a
        .store
        .observations()
        .create(&NewObservation::new("T-1", 1, 0.5))
        .await
        .unwrap();
    sqlx::query("UPDATE observations SET tree_id = '' WHERE id = ?")
        .bind(observation.id)
        .execute(a.store.pool())
        .await
        .unwrap();

    let outcome = a.push().await;
    assert!(matches!(outcome, PushOutcome::Failed(_)));
    assert_eq!(a.store.pending_counts().await.unwrap(), (0, 1));
}

#[tokio::test]
async fn test_wrong_api_key_is_a_failed_push() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;
    let transport =
        HttpTransport::new(&authority.url(), Some("wrong".to_string()), Duration::from_secs(5))
            .unwrap();
    a.store
        .sites()
        .create(&NewSite::new("T-1", 1.0, 2.0))
        .await
        .unwrap();

    let orchestrator = SyncOrchestrator::new(
        a.store.clone(),
        Arc::new(transport),
        Arc::new(StaticConnectivity(true)),
    );
    assert!(matches!(
        orchestrator.pusher().push().await,
        PushOutcome::Failed(_)
    ));
    assert_eq!(a.store.pending_counts().await.unwrap(), (1, 0));
}

#[tokio::test]
async fn test_coming_online_pushes_field_work() {
    let authority = Authority::start().await;
    let a = Replica::new(&authority).await;
    a.store
        .sites()
        .create(&NewSite::new("T-1", 1.0, 2.0))
        .await
        .unwrap();
    a.store
        .observations()
        .create(&NewObservation::new("T-1", 2, 0.9))
        .await
        .unwrap();

    let monitor = ConnectivityMonitor::new(false);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        a.store.clone(),
        a.transport.clone(),
        Arc::new(monitor.clone()),
    ));
    let listener = tokio::spawn(orchestrator.run(monitor.subscribe()));

    // The authority answers its health check, so the probe flips us online.
    assert!(a.transport.health().await.is_ok());
    monitor.set_online(true);

    let mut synced = false;
    for _ in 0..100 {
        if a.store.pending_counts().await.unwrap() == (0, 0) {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(synced);

    let snapshot = authority.store.snapshot().await.unwrap();
    assert_eq!(snapshot.trees.len(), 1);
    assert_eq!(snapshot.collections.len(), 1);

    listener.abort();
}
