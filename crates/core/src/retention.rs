//! Retention policy definitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Minimum hot-store retention in days.
pub const MIN_RETENTION_DAYS: u32 = 30;

/// Maximum hot-store retention in days.
pub const MAX_RETENTION_DAYS: u32 = 365;

/// Hot-store retention period, bounded to 30-365 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RetentionDays(u32);

impl RetentionDays {
    pub fn new(days: u32) -> Result<Self> {
        if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&days) {
            return Err(Error::config(format!(
                "retention_days {} out of range {}-{}",
                days, MIN_RETENTION_DAYS, MAX_RETENTION_DAYS
            )));
        }
        Ok(Self(days))
    }

    pub fn days(&self) -> u32 {
        self.0
    }

    /// TTL for a record ingested at `ingestion_time`.
    ///
    /// Whole-day arithmetic on the UTC timeline, so month and year boundaries
    /// roll over without ever producing an invalid calendar date.
    pub fn ttl_for(&self, ingestion_time: DateTime<Utc>) -> DateTime<Utc> {
        ingestion_time + Duration::days(i64::from(self.0))
    }
}

impl Default for RetentionDays {
    fn default() -> Self {
        Self(90)
    }
}

impl TryFrom<u32> for RetentionDays {
    type Error = Error;

    fn try_from(days: u32) -> Result<Self> {
        Self::new(days)
    }
}

impl From<RetentionDays> for u32 {
    fn from(value: RetentionDays) -> Self {
        value.0
    }
}

/// Storage tier of an archived object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColdTier {
    Standard,
    InfrequentAccess,
    Glacier,
}

impl ColdTier {
    pub const ALL: [ColdTier; 3] = [Self::Standard, Self::InfrequentAccess, Self::Glacier];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::InfrequentAccess => "infrequent_access",
            Self::Glacier => "glacier",
        }
    }
}

impl fmt::Display for ColdTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the lifecycle policy wants done with an object of a given age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Keep,
    Transition(ColdTier),
    Expire,
}

/// Time-based tier transitions for cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdLifecyclePolicy {
    /// Days after archival before moving to infrequent access
    #[serde(default = "default_infrequent_after_days")]
    pub infrequent_after_days: u32,
    /// Days after archival before moving to glacier
    #[serde(default = "default_glacier_after_days")]
    pub glacier_after_days: u32,
    /// Days after archival before deletion
    #[serde(default = "default_expire_after_days")]
    pub expire_after_days: u32,
}

fn default_infrequent_after_days() -> u32 {
    30
}

fn default_glacier_after_days() -> u32 {
    90
}

fn default_expire_after_days() -> u32 {
    2555 // ~7 years
}

impl Default for ColdLifecyclePolicy {
    fn default() -> Self {
        Self {
            infrequent_after_days: default_infrequent_after_days(),
            glacier_after_days: default_glacier_after_days(),
            expire_after_days: default_expire_after_days(),
        }
    }
}

impl ColdLifecyclePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.infrequent_after_days >= self.glacier_after_days
            || self.glacier_after_days >= self.expire_after_days
        {
            return Err(Error::config(
                "cold tier thresholds must be strictly increasing: infrequent < glacier < expire",
            ));
        }
        Ok(())
    }

    /// The tier an object archived at `archived_at` belongs in at `now`.
    pub fn target_tier(&self, archived_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<ColdTier> {
        let age_days = (now - archived_at).num_days();
        if age_days >= i64::from(self.expire_after_days) {
            None
        } else if age_days >= i64::from(self.glacier_after_days) {
            Some(ColdTier::Glacier)
        } else if age_days >= i64::from(self.infrequent_after_days) {
            Some(ColdTier::InfrequentAccess)
        } else {
            Some(ColdTier::Standard)
        }
    }

    /// Decide the action for an object currently in `current`.
    ///
    /// Objects only ever move to colder tiers.
    pub fn action_for(
        &self,
        current: ColdTier,
        archived_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LifecycleAction {
        match self.target_tier(archived_at, now) {
            None => LifecycleAction::Expire,
            Some(target) if target > current => LifecycleAction::Transition(target),
            Some(_) => LifecycleAction::Keep,
        }
    }
}
