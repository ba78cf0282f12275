//! Size limits for the findings pipeline.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so field limits are duplicated there. Keep both in sync when modifying.

// === Ingestion Limits ===

/// Maximum inbound payload size in bytes (1MB).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Maximum envelopes per inbound batch.
pub const MAX_BATCH_ENVELOPES: usize = 1000;

// === Field Limits (chars) ===

/// Finding id max length. Provider ARNs are typically under 200 chars.
pub const MAX_FINDING_ID_LEN: usize = 256;

/// Resource identifier max length.
pub const MAX_RESOURCE_LEN: usize = 2048;

/// Finding type max length.
pub const MAX_FINDING_TYPE_LEN: usize = 512;

/// Description max length.
pub const MAX_DESCRIPTION_LEN: usize = 16 * 1024;

// === Query Limits ===

/// Default page size when the caller gives none.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Hard upper bound on page size.
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Maximum accepted cursor length.
pub const MAX_CURSOR_LEN: usize = 2048;
