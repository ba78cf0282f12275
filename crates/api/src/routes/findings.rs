//! Findings query endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use findings_core::Finding;

use crate::query::{ListParams, Summary};
use crate::response::{ApiError, ApiResponse};
use crate::state::AppState;

/// GET /findings - Severity-ordered, cursor-paginated listing.
pub async fn list_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<Finding>>>, ApiError> {
    let page = state.query.list_findings(&params).await?;
    Ok(Json(ApiResponse::page(page.items, page.next_cursor)))
}

/// GET /findings/:id - Point lookup.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Finding>>, ApiError> {
    let finding = state.query.get_finding(&id).await?;
    Ok(Json(ApiResponse::ok(finding)))
}

/// GET /findings/summary - Counts per severity.
pub async fn summary_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Summary>>, ApiError> {
    let summary = state.query.summary().await?;
    Ok(Json(ApiResponse::ok(summary)))
}
