//! HTTP control surface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sync/full` | Start a full sync in the background |
//! | `POST` | `/sync/incremental` | Start an incremental sync in the background |
//! | `GET`  | `/sync/status` | Connection, cursor, and run status |
//! | `POST` | `/search` | Nearest chunks for a query |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "already_running", "message": "a sync run is already in progress" } }
//! ```
//!
//! Error codes: `bad_request` (400), `already_running` (409),
//! `auth_failed` (502), `provider_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use docsync_core::models::VectorMatch;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::SyncError;
use crate::search::{self, SearchError, DEFAULT_K};
use crate::service::{RunId, SyncService, SyncStatus};

/// Shared state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: SyncService,
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(service: SyncService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sync/full", post(handle_sync_full))
        .route("/sync/incremental", post(handle_sync_incremental))
        .route("/sync/status", get(handle_status))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { service })
}

/// Serve on `bind` until `shutdown` is cancelled.
pub async fn run_server(
    bind: &str,
    service: SyncService,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(service);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "control surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let status = match err {
            SyncError::AlreadyRunning => StatusCode::CONFLICT,
            SyncError::Auth(_) => StatusCode::BAD_GATEWAY,
            SyncError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        let (status, code) = match &err {
            SearchError::EmptyQuery | SearchError::InvalidK => (StatusCode::BAD_REQUEST, "bad_request"),
            SearchError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ POST /sync/{full,incremental} ============

#[derive(Serialize)]
struct StartedResponse {
    status: &'static str,
    run_id: RunId,
    message: String,
    timestamp: DateTime<Utc>,
}

fn started(run_id: RunId, kind: &str) -> (StatusCode, Json<StartedResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            status: "started",
            run_id,
            message: format!("{} sync started in background", kind),
            timestamp: Utc::now(),
        }),
    )
}

async fn handle_sync_full(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<StartedResponse>), AppError> {
    let run_id = state.service.start_full_sync().await?;
    Ok(started(run_id, "full"))
}

async fn handle_sync_incremental(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<StartedResponse>), AppError> {
    let run_id = state.service.start_incremental_sync().await?;
    Ok(started(run_id, "incremental"))
}

// ============ GET /sync/status ============

async fn handle_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.service.status().await)
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<VectorMatch>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let orchestrator = state.service.orchestrator();
    let results = search::search(
        orchestrator.providers(),
        orchestrator.retry_policy(),
        &req.query,
        req.k.unwrap_or(DEFAULT_K),
        req.file_id.as_deref(),
    )
    .await?;
    Ok(Json(SearchResponse { results }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
