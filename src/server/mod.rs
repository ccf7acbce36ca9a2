//! Server-side modules for the sync authority.

pub mod auth;
pub mod routes;
pub mod storage;

pub use auth::{ApiKeyStore, AuthDevice, KeyFileError};
pub use routes::{app_router, AppState};
pub use storage::{AuthorityError, AuthorityStore, IngestSummary};
