//! Archival trigger endpoints.

use axum::{extract::State, Json};

use worker::{ArchivalStatus, SweepReport};

use crate::response::{ApiError, ApiResponse};
use crate::state::AppState;

/// POST /archival/sweep - Run one sweep now.
///
/// Answers 409 while another sweep is running.
pub async fn sweep_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SweepReport>>, ApiError> {
    let report = state.archival.sweep().await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /archival/status - Checkpoint and in-flight view.
pub async fn status_handler(State(state): State<AppState>) -> Json<ApiResponse<ArchivalStatus>> {
    Json(ApiResponse::ok(state.archival.status()))
}
