//! Liveness endpoint with a storage check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when the store does not answer.
    pub status: String,
    /// Storage backend in use (`memory` or `postgres`).
    pub storage: String,
    /// Storage error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
    /// Server time of the check.
    pub checked_at: DateTime<Utc>,
    /// Crate version.
    pub version: String,
}

/// `GET /health` — Service and storage status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Pings the ledger store. Returns 503 with `degraded` when the store is unreachable; submissions still work in that state but fall back to the latest event for validation.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Store unreachable", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.ledger_service.store();
    let ping = store.ping().await;
    if let Err(e) = &ping {
        tracing::warn!(error = %e, backend = store.backend(), "storage ping failed");
    }
    let status = if ping.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if ping.is_ok() { "healthy" } else { "degraded" }.to_string(),
            storage: store.backend().to_string(),
            storage_error: ping.err().map(|e| e.to_string()),
            checked_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Routes mounted outside `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
