//! ClickHouse findings table schema.
//!
//! - `ReplacingMergeTree(version)` keyed by `id` gives last-write-wins upserts
//! - `severity_rank` plus `timestamp` back the severity listing order
//! - the table TTL is the fallback expiry path behind the archival worker

use crate::store::PurgeScope;
use findings_core::{Error, Result};

/// SQL creating the findings database.
pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", database)
}

/// SQL creating the findings table in `database`. With
/// [`PurgeScope::ArchivedOnly`] the table TTL never drops an ACTIVE row.
pub fn create_findings_table(database: &str, table: &str, ttl_scope: PurgeScope) -> String {
    let ttl_filter = match ttl_scope {
        PurgeScope::AnyStatus => "",
        PurgeScope::ArchivedOnly => " WHERE status != 'ACTIVE'",
    };
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {database}.{table} (
    id String,
    severity LowCardinality(String),
    severity_rank UInt8,
    resource String,
    finding_type String,
    description String,
    title Nullable(String),
    account_id Nullable(String),
    region Nullable(String),

    -- Event and lifecycle times, millisecond precision
    timestamp DateTime64(3),
    ingestion_time DateTime64(3),
    ttl_timestamp DateTime64(3),

    status LowCardinality(String),
    version UInt64,

    INDEX idx_severity_time (severity_rank, timestamp) TYPE minmax GRANULARITY 4,
    INDEX idx_ttl ttl_timestamp TYPE minmax GRANULARITY 4
)
ENGINE = ReplacingMergeTree(version)
ORDER BY id
TTL toDateTime(ttl_timestamp) DELETE{ttl_filter}
SETTINGS index_granularity = 8192
"#
    )
}

/// Reject names that are not safe to interpolate into SQL.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "{} '{}' must be an identifier of letters, digits and underscores",
            kind, name
        )))
    }
}
