//! Unified error types for the findings pipeline.
//!
//! Error codes:
//! - VALID_001-002: Malformed input (never retried)
//! - QUERY_001-002: Query rejections
//! - STORE_001-002: Transient store failures (retried, then dead-lettered)
//! - COLD_001: Cold storage failures
//! - NOTIFY_001: Alert delivery failures
//! - ARCHIVE_001-002: Archival consistency failures
//! - CONFIG_001: Configuration errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the findings pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed inbound envelope or finding.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed or out-of-range query parameters.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Hot store failure that may succeed on retry.
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// An external call exceeded its time bound.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("cold storage error: {0}")]
    ColdStorage(String),

    #[error("notification error: {0}")]
    Notification(String),

    /// A record's archival transition could not be completed safely.
    #[error("archival consistency error for {id}: {message}")]
    ArchivalConsistency { id: String, message: String },

    #[error("archival sweep already in progress")]
    SweepInProgress,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient_store(msg: impl Into<String>) -> Self {
        Self::TransientStore(msg.into())
    }

    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            timeout_ms,
        }
    }

    pub fn cold_storage(msg: impl Into<String>) -> Self {
        Self::ColdStorage(msg.into())
    }

    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    pub fn archival_consistency(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ArchivalConsistency {
            id: id.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failed operation may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientStore(_) | Self::Timeout { .. } | Self::ColdStorage(_)
        )
    }

    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALID_001",
            Self::Serialization(_) => "VALID_002",
            Self::InvalidQuery(_) => "QUERY_001",
            Self::NotFound(_) => "QUERY_002",
            Self::TransientStore(_) => "STORE_001",
            Self::Timeout { .. } => "STORE_002",
            Self::ColdStorage(_) => "COLD_001",
            Self::Notification(_) => "NOTIFY_001",
            Self::ArchivalConsistency { .. } => "ARCHIVE_001",
            Self::SweepInProgress => "ARCHIVE_002",
            Self::Config(_) => "CONFIG_001",
            Self::Internal(_) => "INTERNAL_001",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Serialization(_) | Self::InvalidQuery(_) => 400,
            Self::NotFound(_) => 404,
            Self::TransientStore(_) | Self::Timeout { .. } | Self::ColdStorage(_) => 503,
            Self::Notification(_) => 502,
            Self::ArchivalConsistency { .. } | Self::SweepInProgress => 409,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }
}
