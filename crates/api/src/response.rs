//! Standardized API responses.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use findings_core::{Error, Rejection};
use worker::{IngestFailure, IngestReport};

/// Success envelope for query responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            next_cursor: None,
            count: None,
        }
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn page(data: Vec<T>, next_cursor: Option<String>) -> Self {
        Self {
            success: true,
            count: Some(data.len()),
            data,
            next_cursor,
        }
    }
}

/// Response for an ingestion call.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub received: usize,
    pub stored: usize,
    pub updated: usize,
    pub stale: usize,
    pub dead_lettered: usize,
    pub filtered: usize,
    pub alerts_dispatched: usize,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Rejection>,
    /// Findings to resend: neither stored nor dead-lettered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<IngestFailure>,
}

impl From<IngestReport> for IngestResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            success: report.is_complete(),
            received: report.received,
            stored: report.stored,
            updated: report.updated,
            stale: report.stale,
            dead_lettered: report.dead_lettered,
            filtered: report.filtered,
            alerts_dispatched: report.alerts_dispatched,
            timestamp: Utc::now().timestamp_millis(),
            errors: report.rejected,
            failed: report.failed,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
            timestamp: Utc::now(),
        }
    }
}

/// API error carrying the pipeline error code.
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.response)).into_response();

        // Retryable failures tell the caller when to come back
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(code = err.code(), error = %err, "Request failed");
        } else {
            warn!(code = err.code(), error = %err, "Request rejected");
        }

        // Internal details stay in the log
        let message = match &err {
            Error::Internal(_) | Error::Config(_) => "internal error".to_string(),
            _ => err.to_string(),
        };

        Self {
            status,
            retry_after: err.is_transient().then_some(1),
            response: ErrorResponse::new(message, err.code()),
        }
    }
}
