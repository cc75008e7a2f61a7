//! Health check and operator handlers for stream workers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Queue monitoring (`/stream/info`)
//! - Prometheus metrics (`/metrics`)
//! - DLQ inspection (`/admin/dlq/stats`, `/admin/dlq/messages`)

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::metrics;
use crate::queue::QueueMonitor;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub queue: Arc<dyn QueueMonitor>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        queue: Arc<dyn QueueMonitor>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler. Always OK while the server runs.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler. Checks the queue backend.
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    match state.queue.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "queue": "ok" }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "queue": format!("error: {}", e) }
            })),
        ),
    }
}

/// Queue depth, pending leases, delayed retries and DLQ size.
pub async fn stream_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.queue.stats().await {
        Ok(stats) => Ok(Json(json!(stats))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to get stream info: {}", e) })),
        )),
    }
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            output,
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        ),
    }
}

// ============================================================================
// DLQ Admin Handlers
// ============================================================================

/// Query parameters for DLQ list endpoint.
#[derive(Debug, Deserialize)]
pub struct DlqListParams {
    /// Maximum number of messages to return (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Number of messages to skip (default: 0)
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

/// `GET /admin/dlq/stats`
pub async fn dlq_stats_handler(
    State(state): State<HealthState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state.queue.dlq_stats().await.map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })
}

/// `GET /admin/dlq/messages?limit=10&offset=0`
pub async fn dlq_list_handler(
    State(state): State<HealthState>,
    Query(params): Query<DlqListParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let limit = params.limit.min(100);

    match state.queue.dead_letters(limit, params.offset).await {
        Ok(messages) => Ok(Json(json!({
            "count": messages.len(),
            "messages": messages,
            "limit": limit,
            "offset": params.offset,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Liveness, readiness, queue info and metrics.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Read-only DLQ inspection.
pub fn dlq_admin_router(state: HealthState) -> Router {
    Router::new()
        .route("/admin/dlq/stats", get(dlq_stats_handler))
        .route("/admin/dlq/messages", get(dlq_list_handler))
        .with_state(state)
}

/// `health_router` merged with `dlq_admin_router`.
pub fn full_admin_router(state: HealthState) -> Router {
    health_router(state.clone()).merge(dlq_admin_router(state))
}
