//! In-memory cold storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{ArchiveObject, ColdObjectInfo, ColdObjectKey, ColdStorage};
use findings_core::{ColdTier, Error, Result};

struct StoredObject {
    tier: ColdTier,
    archived_at: DateTime<Utc>,
    /// Encoded exactly as a durable backend would hold it
    bytes: Vec<u8>,
}

/// Cold storage held in process memory. Used by tests and by deployments
/// that only want the archival state machine without a bucket.
#[derive(Default)]
pub struct InMemoryColdStorage {
    objects: RwLock<BTreeMap<ColdObjectKey, StoredObject>>,
    writes: std::sync::atomic::AtomicU64,
}

impl InMemoryColdStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful `put` calls, rewrites included.
    pub fn write_count(&self) -> u64 {
        self.writes.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn tier_of(&self, key: &ColdObjectKey) -> Option<ColdTier> {
        self.objects.read().get(key).map(|o| o.tier)
    }

    /// Keys of every stored version of `id`.
    pub fn keys_for(&self, id: &str) -> Vec<ColdObjectKey> {
        self.objects
            .read()
            .keys()
            .filter(|k| k.finding_id() == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ColdStorage for InMemoryColdStorage {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &ColdObjectKey, object: &ArchiveObject) -> Result<()> {
        let bytes = object.encode()?;
        let mut objects = self.objects.write();
        let tier = objects.get(key).map_or(ColdTier::Standard, |o| o.tier);
        objects.insert(
            key.clone(),
            StoredObject {
                tier,
                archived_at: object.archived_at,
                bytes,
            },
        );
        self.writes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn exists(&self, key: &ColdObjectKey) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn get(&self, key: &ColdObjectKey) -> Result<Option<ArchiveObject>> {
        self.objects
            .read()
            .get(key)
            .map(|o| ArchiveObject::decode(&o.bytes))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<ColdObjectInfo>> {
        Ok(self
            .objects
            .read()
            .iter()
            .map(|(key, o)| ColdObjectInfo {
                key: key.clone(),
                tier: o.tier,
                archived_at: o.archived_at,
            })
            .collect())
    }

    async fn transition(&self, key: &ColdObjectKey, tier: ColdTier) -> Result<()> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(key)
            .ok_or_else(|| Error::cold_storage(format!("object {} not found", key)))?;
        object.tier = tier;
        Ok(())
    }

    async fn remove(&self, key: &ColdObjectKey) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
