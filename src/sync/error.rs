use thiserror::Error;

use crate::db::StoreError;

/// Errors that can occur while exchanging records with the authority.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync not configured. Add sync.server_url to config or set RUBBER_SYNC_URL.")]
    NotConfigured,

    #[error("Connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Server rejected batch: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(StoreError::from(e))
    }
}
