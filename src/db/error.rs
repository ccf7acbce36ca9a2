use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the local replica store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to create database directory '{}': {}", .0.display(), .1)]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("Tree '{0}' is already registered")]
    DuplicateTree(String),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow {
        table: &'static str,
        message: String,
    },
}
