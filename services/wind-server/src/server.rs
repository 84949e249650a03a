//! HTTP API serving stored wind artifacts.
//!
//! Provides endpoints for:
//! - The latest stored snapshot (`/latest`)
//! - The snapshot nearest to a given time (`/nearest`)
//! - Liveness, health, acquisition status and Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use wind_common::{parse_iso8601, start_of_day, Cycle, WindError, WindResult};

use crate::config::ServerConfig;
use crate::resolver::{resolve, SearchBound};
use crate::scheduler::ScheduleInfo;
use crate::state::{AcquisitionLedger, ArtifactRecord, LedgerStats, RunRecord};
use crate::store::ArtifactStore;

const VALID_TIME_HEADER: &str = "x-valid-time";

// ============================================================================
// Shared State
// ============================================================================

pub struct AppState {
    pub store: ArtifactStore,
    pub ledger: Option<AcquisitionLedger>,
    pub server: ServerConfig,
    pub schedule: ScheduleInfo,
    pub prometheus: Option<PrometheusHandle>,
}

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    #[serde(rename = "timeIso")]
    pub time_iso: Option<String>,
    /// Days, fractional allowed
    #[serde(rename = "searchLimit")]
    pub search_limit: Option<String>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub latest: Option<String>,
    pub stored: usize,
    pub stored_labels: Vec<String>,
    pub ledger: Option<LedgerStats>,
    pub recent_runs: Vec<RunRecord>,
    pub recent_artifacts: Vec<ArtifactRecord>,
    pub schedule: ScheduleInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// A `WindError` rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(pub WindError);

impl From<WindError> for ApiError {
    fn from(err: WindError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        } else {
            debug!(error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.server.allowed_origins);

    Router::new()
        .route("/", get(root_handler))
        .route("/alive", get(alive_handler))
        .route("/latest", get(latest_handler))
        .route("/nearest", get(nearest_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// CORS for the configured origins; an empty list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([Method::GET]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
async fn root_handler() -> &'static str {
    "hello wind-server.. go to /latest for wind data.."
}

/// GET /alive
async fn alive_handler() -> &'static str {
    "wind-server is alive"
}

/// GET /latest - Most recent artifact of the current UTC day
async fn latest_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let cycle = resolve(&state.store, now, SearchBound::NotBefore(start_of_day(&now)))?;
    Ok(artifact_response(&state.store, &cycle).await?)
}

/// GET /nearest?timeIso=&searchLimit= - Artifact nearest to a given time
async fn nearest_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<NearestQuery>,
) -> Result<Response, ApiError> {
    let target = params
        .time_iso
        .as_deref()
        .ok_or_else(|| {
            WindError::InvalidRequest("expecting timeIso=ISO_TIME_STRING".to_string())
        })
        .and_then(|s| {
            parse_iso8601(s).map_err(|e| WindError::InvalidRequest(e.to_string()))
        })?;

    let bound = search_bound(
        target,
        params.search_limit.as_deref(),
        state.server.max_search_days,
    )?;

    let cycle = resolve(&state.store, target, bound)?;
    Ok(artifact_response(&state.store, &cycle).await?)
}

/// GET /health
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "wind-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status - Stored artifacts, ledger statistics and schedule
async fn status_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let stored_labels = state.store.list_labels().await?;

    let (ledger, recent_runs, recent_artifacts) = match &state.ledger {
        Some(ledger) => (
            ledger.stats().await.ok(),
            ledger.recent_runs(10).await.unwrap_or_default(),
            ledger.recent_artifacts(10).await.unwrap_or_default(),
        ),
        None => (None, Vec::new(), Vec::new()),
    };

    Ok(Json(StatusResponse {
        service: "wind-server".to_string(),
        latest: stored_labels.last().cloned(),
        stored: stored_labels.len(),
        stored_labels,
        ledger,
        recent_runs,
        recent_artifacts,
        schedule: state.schedule.clone(),
    }))
}

/// GET /metrics - Prometheus metrics
async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Metrics recorder not installed").into_response(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build the search bound for a `/nearest` request.
///
/// Without a limit the search only walks backward to the start of the
/// target's UTC day. A limit must be a finite, non-negative number of days
/// and is clamped to `max_days`.
pub fn search_bound(
    target: DateTime<Utc>,
    search_limit: Option<&str>,
    max_days: f64,
) -> WindResult<SearchBound> {
    let Some(raw) = search_limit else {
        return Ok(SearchBound::NotBefore(start_of_day(&target)));
    };

    let days: f64 = raw.trim().parse().map_err(|_| {
        WindError::InvalidRequest(format!("searchLimit must be a number of days, got {:?}", raw))
    })?;

    if !days.is_finite() || days < 0.0 {
        return Err(WindError::InvalidRequest(format!(
            "searchLimit must be a non-negative number of days, got {}",
            raw
        )));
    }

    let days = days.min(max_days.max(0.0));
    let millis = (days * 24.0 * 3600.0 * 1000.0).round() as i64;
    Ok(SearchBound::Within(Duration::milliseconds(millis)))
}

async fn artifact_response(store: &ArtifactStore, cycle: &Cycle) -> WindResult<Response> {
    let label = cycle.label();
    let body = store.read(&label).await?;

    debug!(valid_time = %label, bytes = body.len(), "Serving artifact");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_ENCODING, "gzip".to_string()),
            (HeaderName::from_static(VALID_TIME_HEADER), label),
        ],
        body,
    )
        .into_response())
}

/// Serve the API until `shutdown` fires.
pub async fn run_server(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting wind server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
        })
        .await?;

    Ok(())
}
