//! Connectivity as an injected capability.
//!
//! Push and pull only read [`Connectivity::is_online`]. The orchestrator
//! additionally subscribes to a [`ConnectivityMonitor`] to learn about
//! offline -> online transitions. In the field the monitor is fed by a
//! [`HealthProbe`]; tests flip it by hand.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::transport::SyncTransport;

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Fixed connectivity, for one-shot commands that already know the answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.0
    }
}

/// Shared online flag with change notification.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Records the current state. Subscribers are only woken when the value
    /// actually changes. Returns true on an offline -> online edge.
    pub fn set_online(&self, online: bool) -> bool {
        let mut came_online = false;
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            came_online = online;
            *current = online;
            true
        });
        if came_online {
            tracing::info!("Connectivity restored");
        } else if !online {
            tracing::debug!("Connectivity reported offline");
        }
        came_online
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Derives connectivity from the authority's health endpoint.
pub struct HealthProbe {
    transport: Arc<dyn SyncTransport>,
    monitor: ConnectivityMonitor,
    interval: Duration,
}

impl HealthProbe {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        monitor: ConnectivityMonitor,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            monitor,
            interval,
        }
    }

    /// Probes once and updates the monitor. Returns the observed state.
    pub async fn probe_once(&self) -> bool {
        let online = match self.transport.health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Health probe failed: {}", e);
                false
            }
        };
        self.monitor.set_online(online);
        online
    }

    /// Probes forever on the configured interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.probe_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::transport::mock::MockTransport;

    #[test]
    fn test_monitor_reports_only_online_edges() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        assert!(monitor.set_online(true));
        assert!(monitor.is_online());
        assert!(!monitor.set_online(true));
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_only() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(false);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_probe_tracks_transport_health() {
        let transport = Arc::new(MockTransport::new());
        let monitor = ConnectivityMonitor::new(false);
        let probe = HealthProbe::new(transport.clone(), monitor.clone(), Duration::from_secs(1));

        assert!(probe.probe_once().await);
        assert!(monitor.is_online());

        transport.set_failing(true);
        assert!(!probe.probe_once().await);
        assert!(!monitor.is_online());
    }
}
