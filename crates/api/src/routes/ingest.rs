//! Ingestion endpoint handler.
//!
//! Accepts findings in every shape the event source adapter understands:
//! 1. Single envelope: `{ "id": "...", "severity": "...", ... }`
//! 2. Array: `[envelope, envelope, ...]`
//! 3. Manual batch: `{ "findings": [...] }`
//! 4. Provider event: `{ "source": "...", "detail": { "findings": [...] } }`
//! 5. Redelivery batch: `{ "Records": [{ "body": "<json>" }] }`

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use tracing::{debug, warn};

use crate::response::{ApiError, IngestResponse};
use crate::state::AppState;

/// POST /ingest - Validate, store and alert on a findings payload.
///
/// Malformed envelopes are listed in `errors` while the rest of the batch is
/// processed. An unreadable payload fails the call. Findings that could be
/// neither stored nor dead-lettered are listed in `failed` and the report is
/// returned with 503 so the caller resends them.
pub async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    debug!(payload_size = body.len(), "Received findings payload");

    let batch = match state.adapter.adapt(&body) {
        Ok(batch) => batch,
        Err(e) => {
            telemetry::metrics().findings_rejected.inc();
            return Err(e.into());
        }
    };

    let report = state.processor.ingest_batch(batch).await;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        warn!(failed = report.failed.len(), "Ingest left findings unaccounted for");
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(report.into())))
}
