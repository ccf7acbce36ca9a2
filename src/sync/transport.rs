//! Transport layer between a replica and the authority.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::error::SyncError;
use crate::config::SyncConfig;
use crate::protocol::{IngestResponse, Snapshot, SyncBatch, HEALTH_PATH, SYNC_PATH};

/// Moves batches and snapshots between the replica and the authority.
///
/// Push and pull only ever talk to the authority through this trait, so
/// tests can swap in an in-memory fake.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends one ingest batch. `Ok` only when the authority acknowledged it.
    async fn ingest(&self, batch: &SyncBatch) -> Result<(), SyncError>;

    /// Fetches the authority's full record set.
    async fn snapshot(&self) -> Result<Snapshot, SyncError>;

    /// Cheap reachability check.
    async fn health(&self) -> Result<(), SyncError>;
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(
        server_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let base_url = normalize_base_url(server_url);
        if base_url.is_empty() {
            return Err(SyncError::NotConfigured);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Creates a transport from config.
    ///
    /// Returns an error if no server URL is configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .as_deref()
            .ok_or(SyncError::NotConfigured)?;
        Self::new(
            server_url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn ingest(&self, batch: &SyncBatch) -> Result<(), SyncError> {
        let response = self
            .authorized(self.client.post(self.url(SYNC_PATH)))
            .json(batch)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // The authority reports failures as `{ success: false, error }`,
        // normally with a 500 but the body is authoritative either way.
        match serde_json::from_str::<IngestResponse>(&body) {
            Ok(IngestResponse { success: true, .. }) if status.is_success() => Ok(()),
            Ok(IngestResponse { error, .. }) if status.is_success() => Err(SyncError::Rejected(
                error.unwrap_or_else(|| "success: false".to_string()),
            )),
            Ok(IngestResponse {
                error: Some(message),
                ..
            }) => Err(SyncError::Server {
                status: status.as_u16(),
                message,
            }),
            _ if status.is_success() => Err(SyncError::Protocol(format!(
                "Unexpected ingest response: {}",
                truncate(&body)
            ))),
            _ => Err(server_error(status, &body)),
        }
    }

    async fn snapshot(&self) -> Result<Snapshot, SyncError> {
        let response = self
            .authorized(self.client.get(self.url(SYNC_PATH)))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(server_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| SyncError::Protocol(format!("Invalid snapshot: {}", e)))
    }

    async fn health(&self) -> Result<(), SyncError> {
        let response = self.client.get(self.url(HEALTH_PATH)).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(server_error(status, &body))
        }
    }
}

fn server_error(status: StatusCode, body: &str) -> SyncError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate(body));
    SyncError::Server {
        status: status.as_u16(),
        message,
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

fn normalize_base_url(server_url: &str) -> String {
    let trimmed = server_url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix(SYNC_PATH)
        .unwrap_or(trimmed)
        .to_string()
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::SyncTransport;
    use crate::protocol::{Snapshot, SyncBatch};
    use crate::sync::SyncError;

    /// In-memory authority that records every call.
    #[derive(Default)]
    pub struct MockTransport {
        snapshot: Mutex<Snapshot>,
        received: Mutex<Vec<SyncBatch>>,
        ingest_calls: AtomicUsize,
        snapshot_calls: AtomicUsize,
        fail: AtomicBool,
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_snapshot(snapshot: Snapshot) -> Self {
            let mock = Self::default();
            mock.set_snapshot(snapshot);
            mock
        }

        pub fn set_snapshot(&self, snapshot: Snapshot) {
            *self.snapshot.lock().unwrap() = snapshot;
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Makes the next call wait until the returned handle is notified.
        pub fn hold(&self) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(notify.clone());
            notify
        }

        pub fn ingest_calls(&self) -> usize {
            self.ingest_calls.load(Ordering::SeqCst)
        }

        pub fn snapshot_calls(&self) -> usize {
            self.snapshot_calls.load(Ordering::SeqCst)
        }

        pub fn calls(&self) -> usize {
            self.ingest_calls() + self.snapshot_calls()
        }

        pub fn received(&self) -> Vec<SyncBatch> {
            self.received.lock().unwrap().clone()
        }

        async fn wait_gate(&self) {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }

        fn check(&self) -> Result<(), SyncError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(SyncError::Server {
                    status: 500,
                    message: "mock failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn ingest(&self, batch: &SyncBatch) -> Result<(), SyncError> {
            self.ingest_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_gate().await;
            self.check()?;
            self.received.lock().unwrap().push(batch.clone());
            Ok(())
        }

        async fn snapshot(&self) -> Result<Snapshot, SyncError> {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_gate().await;
            self.check()?;
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn health(&self) -> Result<(), SyncError> {
            self.check()
        }
    }
}
