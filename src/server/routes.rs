use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, ApiKeyStore};
use super::storage::{AuthorityError, AuthorityStore};
use crate::protocol::{IngestResponse, Snapshot, SyncBatch, HEALTH_PATH, SYNC_PATH};

/// Largest accepted ingest body. A replica that was offline for a whole
/// season pushes everything it has in one request.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AuthorityStore>,
    pub api_keys: Arc<ApiKeyStore>,
}

impl AppState {
    pub fn new(store: AuthorityStore, api_keys: ApiKeyStore) -> Self {
        Self {
            store: Arc::new(store),
            api_keys: Arc::new(api_keys),
        }
    }
}

/// Any failure on the sync endpoints. Always reported as a 500 with the
/// `{ success: false, error }` body replicas understand.
#[derive(Debug)]
pub struct IngestFailure(String);

impl From<AuthorityError> for IngestFailure {
    fn from(e: AuthorityError) -> Self {
        Self(e.to_string())
    }
}

impl From<JsonRejection> for IngestFailure {
    fn from(e: JsonRejection) -> Self {
        Self(format!("Malformed batch: {}", e.body_text()))
    }
}

impl IntoResponse for IngestFailure {
    fn into_response(self) -> Response {
        tracing::error!("Sync request failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(IngestResponse::failed(self.0)),
        )
            .into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(SYNC_PATH, get(snapshot).post(ingest))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route(HEALTH_PATH, get(health))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ingest(
    State(state): State<AppState>,
    body: Result<Json<SyncBatch>, JsonRejection>,
) -> Result<Json<IngestResponse>, IngestFailure> {
    let Json(batch) = body?;
    let summary = state.store.ingest(&batch).await?;
    tracing::info!(
        trees = summary.trees_upserted,
        collections = summary.collections_inserted,
        "Ingested batch"
    );
    Ok(Json(IngestResponse::ok()))
}

async fn snapshot(State(state): State<AppState>) -> Result<Json<Snapshot>, IngestFailure> {
    let snapshot = state.store.snapshot().await?;
    tracing::debug!(
        trees = snapshot.trees.len(),
        collections = snapshot.collections.len(),
        "Served snapshot"
    );
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn setup(api_keys: ApiKeyStore) -> (Router, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = AuthorityStore::connect(&temp_dir.path().join("authority.db"))
            .await
            .unwrap();
        (app_router(AppState::new(store, api_keys)), temp_dir)
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(SYNC_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _temp) = setup(ApiKeyStore::default().with_key("k", "tablet")).await;
        let response = app.oneshot(get(HEALTH_PATH)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_ingest_then_snapshot() {
        let (app, _temp) = setup(ApiKeyStore::default()).await;

        let response = app
            .clone()
            .oneshot(post_json(json!({
                "trees": [{"tree_id": "T-1", "lat": 1.0, "lng": 2.0, "note": null}],
                "collections": [{
                    "tree_id": "T-1", "cuts": 2, "milk_amount": 0.8,
                    "note": null, "timestamp": "2025-03-01T06:00:00Z"
                }]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));

        let response = app.oneshot(get(SYNC_PATH)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["trees"][0]["tree_id"], "T-1");
        assert!(body["trees"][0]["created_at"].is_string());
        assert_eq!(body["collections"][0]["cuts"], 2);
        assert_eq!(
            body["collections"][0]["timestamp"],
            "2025-03-01T06:00:00.000Z"
        );
    }

    #[tokio::test]
    async fn test_invalid_batch_is_500_with_error_body() {
        let (app, _temp) = setup(ApiKeyStore::default()).await;

        let response = app
            .oneshot(post_json(json!({
                "trees": [{"tree_id": "T-1", "lat": 91.0, "lng": 2.0}]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("T-1"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_500() {
        let (app, _temp) = setup(ApiKeyStore::default()).await;

        let request = Request::builder()
            .method("POST")
            .uri(SYNC_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_sync_requires_key_when_configured() {
        let (app, _temp) = setup(ApiKeyStore::default().with_key("secret", "tablet")).await;

        let response = app.clone().oneshot(get(SYNC_PATH)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri(SYNC_PATH)
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "invalid_key");

        let request = Request::builder()
            .uri(SYNC_PATH)
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
