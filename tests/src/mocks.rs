//! Mock implementations for testing.
//!
//! Each mock implements the same trait as the production component, so tests
//! drive the real processor, archival worker and router with faults injected
//! at the storage and notification seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use findings_core::{ColdTier, Error, Finding, Result, Severity};
use findings_store::{
    ArchiveObject, ColdObjectInfo, ColdObjectKey, ColdStorage, ExpiringPage, ExpiryCursor,
    FindingsStore, InMemoryColdStorage, InMemoryFindingsStore, PageCursor, PutOutcome,
    PurgeScope, QueryFilter, QueryPage,
};
use redpanda::{DeadLetter, DeadLetterSink, MemoryDeadLetterSink};
use worker::{Alert, AlertChannel};

/// Alert channel that records every delivered alert.
pub struct RecordingChannel {
    name: String,
    delivered: Mutex<Vec<Alert>>,
    failures_left: AtomicU32,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::failing_first(name, 0)
    }

    /// A channel whose first `failures` deliveries fail.
    pub fn failing_first(name: impl Into<String>, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            delivered: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(failures),
        })
    }

    /// Alerts delivered so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Wait until at least `n` alerts arrived. Delivery runs on spawned
    /// tasks, so tests poll for it.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::notification(format!("{} unavailable", self.name)));
        }
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}

/// Hot store that can be told to fail.
pub struct FlakyStore {
    inner: Arc<InMemoryFindingsStore>,
    fail_puts: AtomicU32,
    fail_all: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryFindingsStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_puts: AtomicU32::new(0),
            fail_all: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        })
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Fail every call until [`FlakyStore::heal`].
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Fail reads only; writes go through.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_puts.store(0, Ordering::SeqCst);
        self.fail_all.store(false, Ordering::SeqCst);
        self.fail_reads.store(false, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::transient_store(format!("{} throttled", operation)));
        }
        Ok(())
    }

    fn check_read(&self, operation: &str) -> Result<()> {
        self.check(operation)?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::transient_store(format!("{} throttled", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl FindingsStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn put(&self, finding: Finding) -> Result<PutOutcome> {
        self.check("put")?;
        let failing = self
            .fail_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::transient_store("put throttled"));
        }
        self.inner.put(finding).await
    }

    async fn get(&self, id: &str) -> Result<Option<Finding>> {
        self.check("get")?;
        self.inner.get(id).await
    }

    async fn query(
        &self,
        filter: QueryFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<QueryPage> {
        self.check_read("query")?;
        self.inner.query(filter, cursor, limit).await
    }

    async fn delete(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        self.check("delete")?;
        self.inner.delete(id, expected_version).await
    }

    async fn mark_archived(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        self.check("mark_archived")?;
        self.inner.mark_archived(id, expected_version).await
    }

    async fn expiring(
        &self,
        before: DateTime<Utc>,
        cursor: Option<&ExpiryCursor>,
        limit: usize,
    ) -> Result<ExpiringPage> {
        self.check_read("expiring")?;
        self.inner.expiring(before, cursor, limit).await
    }

    async fn count_by_severity(&self) -> Result<BTreeMap<Severity, u64>> {
        self.check_read("count_by_severity")?;
        self.inner.count_by_severity().await
    }

    async fn purge_expired(&self, now: DateTime<Utc>, scope: PurgeScope) -> Result<u64> {
        self.check("purge_expired")?;
        self.inner.purge_expired(now, scope).await
    }

    async fn ping(&self) -> Result<()> {
        self.check("ping")?;
        self.inner.ping().await
    }
}

/// How a [`CrashingStore`] breaks hot removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crash {
    /// The removal call returns an error
    Fail,
    /// The removal call never returns
    Hang,
}

/// Hot store whose removal of chosen ids fails, standing in for a worker
/// that dies between the cold write and the hot delete.
pub struct CrashingStore {
    inner: Arc<InMemoryFindingsStore>,
    crashing: Mutex<HashSet<String>>,
    mode: Crash,
}

impl CrashingStore {
    pub fn new(inner: Arc<InMemoryFindingsStore>, mode: Crash) -> Arc<Self> {
        Arc::new(Self {
            inner,
            crashing: Mutex::new(HashSet::new()),
            mode,
        })
    }

    pub fn crash_on(&self, id: &str) {
        self.crashing.lock().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.crashing.lock().clear();
    }

    async fn removal(&self, id: &str) -> Result<()> {
        if !self.crashing.lock().contains(id) {
            return Ok(());
        }
        match self.mode {
            Crash::Fail => Err(Error::transient_store(format!(
                "connection reset removing {}",
                id
            ))),
            Crash::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl FindingsStore for CrashingStore {
    fn backend(&self) -> &'static str {
        "crashing"
    }

    async fn put(&self, finding: Finding) -> Result<PutOutcome> {
        self.inner.put(finding).await
    }

    async fn get(&self, id: &str) -> Result<Option<Finding>> {
        self.inner.get(id).await
    }

    async fn query(
        &self,
        filter: QueryFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<QueryPage> {
        self.inner.query(filter, cursor, limit).await
    }

    async fn delete(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        self.removal(id).await?;
        self.inner.delete(id, expected_version).await
    }

    async fn mark_archived(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        self.removal(id).await?;
        self.inner.mark_archived(id, expected_version).await
    }

    async fn expiring(
        &self,
        before: DateTime<Utc>,
        cursor: Option<&ExpiryCursor>,
        limit: usize,
    ) -> Result<ExpiringPage> {
        self.inner.expiring(before, cursor, limit).await
    }

    async fn count_by_severity(&self) -> Result<BTreeMap<Severity, u64>> {
        self.inner.count_by_severity().await
    }

    async fn purge_expired(&self, now: DateTime<Utc>, scope: PurgeScope) -> Result<u64> {
        self.inner.purge_expired(now, scope).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Cold storage that rejects writes for chosen ids.
pub struct FlakyColdStorage {
    inner: Arc<InMemoryColdStorage>,
    failing: Mutex<HashSet<String>>,
}

impl FlakyColdStorage {
    pub fn new(inner: Arc<InMemoryColdStorage>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_writes_for(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }
}

#[async_trait]
impl ColdStorage for FlakyColdStorage {
    fn backend(&self) -> &'static str {
        "flaky-cold"
    }

    async fn put(&self, key: &ColdObjectKey, object: &ArchiveObject) -> Result<()> {
        if self.failing.lock().contains(&key.finding_id()) {
            return Err(Error::cold_storage(format!("write of {} rejected", key)));
        }
        self.inner.put(key, object).await
    }

    async fn exists(&self, key: &ColdObjectKey) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &ColdObjectKey) -> Result<Option<ArchiveObject>> {
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<ColdObjectInfo>> {
        self.inner.list().await
    }

    async fn transition(&self, key: &ColdObjectKey, tier: ColdTier) -> Result<()> {
        self.inner.transition(key, tier).await
    }

    async fn remove(&self, key: &ColdObjectKey) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// Dead-letter sink that refuses letters for chosen finding ids.
pub struct GatedDeadLetterSink {
    inner: Arc<MemoryDeadLetterSink>,
    refused: Mutex<HashSet<String>>,
}

impl GatedDeadLetterSink {
    pub fn new(inner: Arc<MemoryDeadLetterSink>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            refused: Mutex::new(HashSet::new()),
        })
    }

    pub fn refuse(&self, id: &str) {
        self.refused.lock().insert(id.to_string());
    }

    pub fn reopen(&self) {
        self.refused.lock().clear();
    }
}

#[async_trait]
impl DeadLetterSink for GatedDeadLetterSink {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn send(&self, letter: DeadLetter) -> Result<()> {
        if self.refused.lock().contains(&letter.finding.id) {
            return Err(Error::transient_store("dead-letter topic unreachable"));
        }
        self.inner.send(letter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{jan_first, normalized};
    use findings_core::RetentionDays;

    #[tokio::test]
    async fn test_recording_channel_fails_first() {
        let channel = RecordingChannel::failing_first("pager", 1);
        let alert = Alert::operational("store down", "security-alerts");

        assert!(channel.deliver(&alert).await.is_err());
        assert!(channel.deliver(&alert).await.is_ok());
        assert_eq!(channel.count(), 1);
        assert!(channel.wait_for(1, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_heals() {
        let store = FlakyStore::new(Arc::new(InMemoryFindingsStore::new()));
        let finding = Finding::stamp(
            normalized("f1", Severity::High, jan_first()),
            jan_first(),
            RetentionDays::default(),
        );

        store.fail_next_puts(1);
        assert!(matches!(
            store.put(finding.clone()).await,
            Err(Error::TransientStore(_))
        ));
        assert_eq!(store.put(finding).await.unwrap(), PutOutcome::Inserted);

        store.fail_all();
        assert!(store.get("f1").await.is_err());
        store.heal();
        assert!(store.get("f1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_gated_sink_refuses_then_reopens() {
        let letters = Arc::new(MemoryDeadLetterSink::new());
        let gate = GatedDeadLetterSink::new(letters.clone());
        let finding = Finding::stamp(
            normalized("f1", Severity::High, jan_first()),
            jan_first(),
            RetentionDays::default(),
        );
        let error = Error::transient_store("timeout");

        gate.refuse("f1");
        assert!(gate.send(DeadLetter::new(finding.clone(), &error, 3)).await.is_err());
        gate.reopen();
        gate.send(DeadLetter::new(finding, &error, 3)).await.unwrap();
        assert_eq!(letters.len(), 1);
    }
}
