//! Bearer API-key authentication for the sync endpoints.
//!
//! Keys are read from a YAML file:
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     device: "field-tablet-1"
//! ```
//!
//! A missing file or an empty key list leaves the endpoints open. A file
//! that exists but cannot be read or parsed is an error, never "open".

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::routes::AppState;

#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct KeyFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// The replica a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDevice {
    pub name: String,
}

/// Maps API key -> device.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthDevice>,
}

impl ApiKeyStore {
    /// Load API keys from a YAML file. Only a missing file yields an
    /// empty store.
    pub fn load(path: &Path) -> Result<Self, KeyFileError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("No key file at {}", path.display());
                tracing::warn!("No API keys loaded - sync endpoints are unauthenticated");
                return Ok(Self::default());
            }
            Err(e) => return Err(KeyFileError::Read(path.to_path_buf(), e)),
        };

        let store =
            Self::from_yaml(&contents).map_err(|e| KeyFileError::Parse(path.to_path_buf(), e))?;
        if store.is_empty() {
            tracing::warn!("Key file lists no API keys - sync endpoints are unauthenticated");
        } else {
            tracing::info!("Loaded {} API key(s)", store.len());
        }
        Ok(store)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let file: KeyFile = serde_yaml::from_str(contents)?;
        let keys = file
            .api_keys
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let name = entry.device.unwrap_or_else(|| format!("device-{}", i + 1));
                (entry.key, AuthDevice { name })
            })
            .collect();
        Ok(Self { keys })
    }

    pub fn with_key(mut self, key: impl Into<String>, device: impl Into<String>) -> Self {
        self.keys.insert(
            key.into(),
            AuthDevice {
                name: device.into(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn validate(&self, key: &str) -> Option<AuthDevice> {
        self.keys.get(key).cloned()
    }
}

#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("Failed to read key file '{}': {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse key file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
}

#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

fn unauthorized(error: &'static str, message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(AuthError { error, message })).into_response()
}

/// Rejects requests without a known bearer key, unless no keys are
/// configured at all.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if state.api_keys.is_empty() {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key.trim(),
            None => {
                return unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => return unauthorized("missing_auth", "Authorization header required"),
    };

    match state.api_keys.validate(api_key) {
        Some(device) => {
            tracing::debug!(device = %device.name, "Authenticated sync request");
            request.extensions_mut().insert(device);
            next.run(request).await
        }
        None => unauthorized("invalid_key", "Invalid API key"),
    }
}
