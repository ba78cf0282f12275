//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use telemetry::{health, metrics, HealthReport, MetricsSnapshot};

use crate::query::ServiceHealth;
use crate::state::AppState;

/// Readiness detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub health: HealthReport,
    pub metrics: MetricsSnapshot,
}

/// GET /health - Fixed healthy answer; never touches the store.
pub async fn health_handler(State(state): State<AppState>) -> Json<ServiceHealth> {
    Json(state.query.health())
}

/// GET /health/ready - Readiness check (can accept traffic).
pub async fn ready_handler() -> (StatusCode, Json<ReadinessResponse>) {
    let ready = health().is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            health: health().report(),
            metrics: metrics().snapshot(),
        }),
    )
}

/// GET /health/live - Liveness check (process is serving).
pub async fn live_handler() -> StatusCode {
    StatusCode::OK
}
