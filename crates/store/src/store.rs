//! Hot findings store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::cursor::{ExpiryCursor, PageCursor};
use findings_core::{Finding, FindingStatus, Result, Severity};

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No record existed for the id
    Inserted,
    /// An older record was replaced
    Updated,
    /// The stored record has a later `ingestion_time`; nothing was written
    Superseded,
}

/// Filter applied by [`FindingsStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryFilter {
    pub severity: Option<Severity>,
    pub status: FindingStatus,
}

/// One page of a severity-ordered listing.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Finding>,
    /// Present only when more matching records follow.
    pub next_cursor: Option<PageCursor>,
}

/// One page of records approaching expiry, ordered by TTL.
#[derive(Debug, Clone, Default)]
pub struct ExpiringPage {
    pub items: Vec<Finding>,
    pub next_cursor: Option<ExpiryCursor>,
}

/// Keyed storage for findings with a `(severity, timestamp)` ordering index
/// and a TTL attribute.
///
/// `put` is atomic per key and resolves concurrent writers by
/// last-write-wins on `ingestion_time`. Listings are ordered by severity
/// descending, then event time descending, then id.
/// Which expired records the TTL reaper may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    /// Every expired record. Only safe when nothing is archived.
    AnyStatus,
    /// Expired tombstones only. ACTIVE records stay until a sweep has
    /// written them to cold storage.
    ArchivedOnly,
}

#[async_trait]
pub trait FindingsStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Idempotent upsert by id.
    async fn put(&self, finding: Finding) -> Result<PutOutcome>;

    /// Point lookup. Returns tombstones as well as active records.
    async fn get(&self, id: &str) -> Result<Option<Finding>>;

    /// Keyset-paginated listing; the cursor is exclusive.
    async fn query(
        &self,
        filter: QueryFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<QueryPage>;

    /// Remove a record. With `expected_version`, only removes the record if
    /// its version still matches; returns whether a record was removed.
    async fn delete(&self, id: &str, expected_version: Option<i64>) -> Result<bool>;

    /// Replace the record with an ARCHIVED tombstone, under the same version
    /// condition as [`FindingsStore::delete`].
    async fn mark_archived(&self, id: &str, expected_version: Option<i64>) -> Result<bool>;

    /// ACTIVE records with `ttl_timestamp <= before`, ordered by `(ttl, id)`.
    async fn expiring(
        &self,
        before: DateTime<Utc>,
        cursor: Option<&ExpiryCursor>,
        limit: usize,
    ) -> Result<ExpiringPage>;

    /// Count of ACTIVE records per severity.
    async fn count_by_severity(&self) -> Result<BTreeMap<Severity, u64>>;

    /// Drop records whose TTL has passed and that `scope` allows. Returns
    /// the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>, scope: PurgeScope) -> Result<u64>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}
