//! Cold archive storage.
//!
//! Archived findings are written as gzip-compressed JSON objects keyed by
//! `<hex(id)>/<ingestion_time_ms>`. The presence of that key is the durable
//! evidence that a record reached `COLD_WRITTEN`.

mod fs;
mod memory;

pub use fs::FilesystemColdStorage;
pub use memory::InMemoryColdStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use tracing::warn;

use findings_core::{
    ColdLifecyclePolicy, ColdTier, Error, Finding, LifecycleAction, Result, RetentionDays,
};

/// Current archive object layout.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// A finding as stored in cold storage, with archive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveObject {
    pub archived_at: DateTime<Utc>,
    pub retention_days: u32,
    pub archive_format_version: u32,
    pub finding: Finding,
}

impl ArchiveObject {
    pub fn new(finding: Finding, retention: RetentionDays, archived_at: DateTime<Utc>) -> Self {
        Self {
            archived_at,
            retention_days: retention.days(),
            archive_format_version: ARCHIVE_FORMAT_VERSION,
            finding,
        }
    }

    /// Gzip-compressed JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| Error::cold_storage(format!("compression failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| Error::cold_storage(format!("compression failed: {}", e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| Error::cold_storage(format!("corrupt archive object: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| Error::cold_storage(format!("unreadable archive object: {}", e)))
    }
}

/// Cold storage key of one archived record version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColdObjectKey {
    id_hex: String,
    version: i64,
}

impl ColdObjectKey {
    pub fn for_finding(finding: &Finding) -> Self {
        Self {
            id_hex: hex::encode(finding.id.as_bytes()),
            version: finding.version(),
        }
    }

    /// Parse `<hex(id)>/<version>`.
    pub fn parse(key: &str) -> Option<Self> {
        let (id_hex, version) = key.split_once('/')?;
        let id = hex::decode(id_hex).ok()?;
        if id.is_empty() || String::from_utf8(id).is_err() {
            return None;
        }
        Some(Self {
            id_hex: id_hex.to_ascii_lowercase(),
            version: version.parse().ok()?,
        })
    }

    pub fn id_hex(&self) -> &str {
        &self.id_hex
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// The finding id this key belongs to.
    pub fn finding_id(&self) -> String {
        hex::decode(&self.id_hex)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for ColdObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id_hex, self.version)
    }
}

/// Listing entry used by the lifecycle pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ColdObjectInfo {
    pub key: ColdObjectKey,
    pub tier: ColdTier,
    pub archived_at: DateTime<Utc>,
}

/// Outcome of one lifecycle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub examined: u64,
    pub transitioned: u64,
    pub expired: u64,
    pub failed: u64,
}

/// Long-term archive of findings.
#[async_trait]
pub trait ColdStorage: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Write an object. Returns only once the object is durable; a rewrite of
    /// an existing key replaces it.
    async fn put(&self, key: &ColdObjectKey, object: &ArchiveObject) -> Result<()>;

    async fn exists(&self, key: &ColdObjectKey) -> Result<bool>;

    async fn get(&self, key: &ColdObjectKey) -> Result<Option<ArchiveObject>>;

    async fn list(&self) -> Result<Vec<ColdObjectInfo>>;

    /// Move an object to a colder tier.
    async fn transition(&self, key: &ColdObjectKey, tier: ColdTier) -> Result<()>;

    async fn remove(&self, key: &ColdObjectKey) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    /// Apply tier transitions and expiry by object age. A failing object is
    /// logged and counted; the pass continues with the rest.
    async fn apply_lifecycle(
        &self,
        policy: &ColdLifecyclePolicy,
        now: DateTime<Utc>,
    ) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();

        for info in self.list().await? {
            report.examined += 1;
            let result = match policy.action_for(info.tier, info.archived_at, now) {
                LifecycleAction::Keep => continue,
                LifecycleAction::Transition(tier) => self
                    .transition(&info.key, tier)
                    .await
                    .map(|_| report.transitioned += 1),
                LifecycleAction::Expire => {
                    self.remove(&info.key).await.map(|_| report.expired += 1)
                }
            };
            if let Err(e) = result {
                warn!(key = %info.key, error = %e, "Cold lifecycle action failed");
                report.failed += 1;
            }
        }

        Ok(report)
    }
}
