//! Startup sync for CLI invocations.
//!
//! When `auto_sync` is enabled every command first runs the startup
//! sequence. Nothing here can fail the command: the CLI must keep working
//! in the field with no signal.

use std::sync::Arc;

use super::connectivity::{Connectivity, StaticConnectivity};
use super::orchestrator::{SequenceOutcome, SyncOrchestrator};
use super::transport::{HttpTransport, SyncTransport};
use crate::config::Config;
use crate::db::LocalStore;

/// Runs the startup trigger if enabled and the authority answers its
/// health check.
pub async fn try_auto_sync(config: &Config, store: &LocalStore) -> Option<SequenceOutcome> {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return None;
    }

    let transport = match HttpTransport::from_config(&config.sync) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::debug!("Auto-sync unavailable: {}", e);
            return None;
        }
    };

    // Fast fail before touching anything else.
    let online = transport.health().await.is_ok();
    if !online {
        eprintln!("Auto-sync: server unreachable, skipping");
        return None;
    }

    let connectivity: Arc<dyn Connectivity> = Arc::new(StaticConnectivity(online));
    let orchestrator = SyncOrchestrator::new(store.clone(), transport, connectivity);
    let outcome = orchestrator.on_startup().await;

    if let SequenceOutcome::Completed(report) = &outcome {
        if let super::PushOutcome::Failed(e) = &report.push {
            eprintln!("Auto-sync: push {}", e);
        }
        if let super::PullOutcome::Failed(e) = &report.pull {
            eprintln!("Auto-sync: pull {}", e);
        }
    }

    Some(outcome)
}
