//! In-memory findings store.
//!
//! Backs tests and single-node deployments. A single `RwLock` guards the
//! records and both indexes, which makes every operation atomic per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use tracing::debug;

use crate::cursor::{ExpiryCursor, PageCursor, SeverityKey};
use crate::store::{
    ExpiringPage, FindingsStore, PurgeScope, PutOutcome, QueryFilter, QueryPage,
};
use findings_core::{Finding, FindingStatus, Result, Severity};

#[derive(Default)]
struct Inner {
    records: HashMap<String, Finding>,
    by_severity: BTreeSet<SeverityKey>,
    /// ACTIVE records only
    by_expiry: BTreeSet<(i64, String)>,
}

fn severity_key(finding: &Finding) -> SeverityKey {
    (
        Reverse(finding.severity.rank()),
        Reverse(finding.timestamp.timestamp_millis()),
        finding.id.clone(),
    )
}

fn expiry_key(finding: &Finding) -> (i64, String) {
    (finding.ttl_timestamp.timestamp_millis(), finding.id.clone())
}

impl Inner {
    fn insert(&mut self, finding: Finding) {
        self.by_severity.insert(severity_key(&finding));
        if finding.is_active() {
            self.by_expiry.insert(expiry_key(&finding));
        }
        self.records.insert(finding.id.clone(), finding);
    }

    fn remove(&mut self, id: &str) -> Option<Finding> {
        let finding = self.records.remove(id)?;
        self.by_severity.remove(&severity_key(&finding));
        self.by_expiry.remove(&expiry_key(&finding));
        Some(finding)
    }

    fn version_matches(&self, id: &str, expected_version: Option<i64>) -> bool {
        match (self.records.get(id), expected_version) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(existing), Some(version)) => existing.version() == version,
        }
    }
}

/// Findings store held in process memory.
#[derive(Default)]
pub struct InMemoryFindingsStore {
    inner: RwLock<Inner>,
}

impl InMemoryFindingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FindingsStore for InMemoryFindingsStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, finding: Finding) -> Result<PutOutcome> {
        let mut inner = self.inner.write();

        let outcome = match inner.records.get(&finding.id) {
            None => PutOutcome::Inserted,
            Some(existing) if existing.ingestion_time > finding.ingestion_time => {
                return Ok(PutOutcome::Superseded);
            }
            Some(_) => PutOutcome::Updated,
        };

        inner.remove(&finding.id);
        inner.insert(finding);
        Ok(outcome)
    }

    async fn get(&self, id: &str) -> Result<Option<Finding>> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    async fn query(
        &self,
        filter: QueryFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<QueryPage> {
        let inner = self.inner.read();

        let start = match (cursor, filter.severity) {
            (Some(cursor), _) => Bound::Excluded(cursor.index_key()),
            (None, Some(severity)) => {
                Bound::Included((Reverse(severity.rank()), Reverse(i64::MAX), String::new()))
            }
            (None, None) => Bound::Unbounded,
        };

        let mut items = Vec::with_capacity(limit.min(inner.records.len()));
        let mut has_more = false;

        for (Reverse(rank), _, id) in inner.by_severity.range((start, Bound::Unbounded)) {
            if let Some(severity) = filter.severity {
                if *rank < severity.rank() {
                    break;
                }
                if *rank > severity.rank() {
                    continue;
                }
            }
            let Some(finding) = inner.records.get(id) else {
                continue;
            };
            if finding.status != filter.status {
                continue;
            }
            if items.len() == limit {
                has_more = true;
                break;
            }
            items.push(finding.clone());
        }

        let next_cursor = if has_more {
            items.last().map(PageCursor::after)
        } else {
            None
        };

        Ok(QueryPage { items, next_cursor })
    }

    async fn delete(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        let mut inner = self.inner.write();
        if !inner.version_matches(id, expected_version) {
            return Ok(false);
        }
        Ok(inner.remove(id).is_some())
    }

    async fn mark_archived(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        let mut inner = self.inner.write();
        if !inner.version_matches(id, expected_version) {
            return Ok(false);
        }
        let Some(mut finding) = inner.remove(id) else {
            return Ok(false);
        };
        finding.status = FindingStatus::Archived;
        inner.insert(finding);
        Ok(true)
    }

    async fn expiring(
        &self,
        before: DateTime<Utc>,
        cursor: Option<&ExpiryCursor>,
        limit: usize,
    ) -> Result<ExpiringPage> {
        let inner = self.inner.read();
        let before_ms = before.timestamp_millis();

        let start = match cursor {
            Some(cursor) => Bound::Excluded((cursor.ttl_ms, cursor.id.clone())),
            None => Bound::Unbounded,
        };

        let mut items = Vec::new();
        let mut has_more = false;

        for (ttl_ms, id) in inner.by_expiry.range((start, Bound::Unbounded)) {
            if *ttl_ms > before_ms {
                break;
            }
            if items.len() == limit {
                has_more = true;
                break;
            }
            if let Some(finding) = inner.records.get(id) {
                items.push(finding.clone());
            }
        }

        let next_cursor = if has_more {
            items.last().map(ExpiryCursor::after)
        } else {
            None
        };

        Ok(ExpiringPage { items, next_cursor })
    }

    async fn count_by_severity(&self) -> Result<BTreeMap<Severity, u64>> {
        let inner = self.inner.read();
        let mut counts = BTreeMap::new();
        for finding in inner.records.values().filter(|f| f.is_active()) {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn purge_expired(&self, now: DateTime<Utc>, scope: PurgeScope) -> Result<u64> {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .records
            .values()
            .filter(|f| f.is_expired(now))
            .filter(|f| scope == PurgeScope::AnyStatus || !f.is_active())
            .map(|f| f.id.clone())
            .collect();

        for id in &expired {
            inner.remove(id);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged expired findings");
        }
        Ok(expired.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
