//! Rubber Sync Server
//!
//! The single authority every field replica pushes to and pulls from.
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUBBER_PORT`: Port to listen on (default: 8080)
//! - `RUBBER_SERVER_DATABASE`: SQLite file holding the authority tables
//!   (default: ~/.local/share/rubber-server/authority.db)
//! - `RUBBER_SERVER_CONFIG`: Path to config file
//!   (default: ~/.config/rubber-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     device: "field-tablet-1"
//! ```
//!
//! With no config file, or one listing no keys, the sync endpoints accept
//! any request. A config file that fails to parse stops the server.
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /api/sync`: Ingest a batch of trees and collections
//! - `GET /api/sync`: Full current record set

use std::net::SocketAddr;
use std::path::PathBuf;

use rubber_sync::server::{app_router, ApiKeyStore, AppState, AuthorityStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Authority database file
    database_path: PathBuf,
    /// Path to config file
    config_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("RUBBER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let database_path = std::env::var("RUBBER_SERVER_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("rubber-server")
                    .join("authority.db")
            });

        let config_path = std::env::var("RUBBER_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("rubber-server")
                    .join("config.yaml")
            });

        Self {
            port,
            database_path,
            config_path,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rubber_server=info,rubber_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    tracing::info!("Database: {}", config.database_path.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let store = AuthorityStore::connect(&config.database_path).await?;
    let api_keys = ApiKeyStore::load(&config.config_path)?;
    let app = app_router(AppState::new(store, api_keys));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
