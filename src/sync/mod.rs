//! Replica-side synchronization with the authority.
//!
//! Every local record carries a [`SyncStatus`](crate::models::SyncStatus)
//! flag. Push sends whatever is pending and flips the acknowledged records
//! to synced. Pull fetches the authority's full record set and merges it
//! without clobbering pending local work. The orchestrator decides when
//! each runs.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rubber_sync::db::LocalStore;
//! use rubber_sync::sync::{ConnectivityMonitor, HttpTransport, SyncOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::open("rubber.db".as_ref()).await?;
//! let transport = Arc::new(HttpTransport::new(
//!     "http://localhost:8080",
//!     None,
//!     Duration::from_secs(10),
//! )?);
//! let monitor = ConnectivityMonitor::new(true);
//! let orchestrator = SyncOrchestrator::new(store, transport, Arc::new(monitor));
//! orchestrator.on_startup().await;
//! # Ok(())
//! # }
//! ```

pub mod auto_sync;
pub mod connectivity;
mod error;
pub mod orchestrator;
pub mod pull;
pub mod push;
pub mod transport;

pub use auto_sync::try_auto_sync;
pub use connectivity::{Connectivity, ConnectivityMonitor, HealthProbe, StaticConnectivity};
pub use error::SyncError;
pub use orchestrator::{SequenceOutcome, SyncOrchestrator, SyncReport, Trigger};
pub use pull::{PullOutcome, PullSummary, Puller, DEDUP_WINDOW};
pub use push::{PushOutcome, Pusher};
pub use transport::{HttpTransport, SyncTransport};
