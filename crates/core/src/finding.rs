//! Finding model and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::retention::RetentionDays;

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Informational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "INFORMATIONAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Numeric rank used by ordered indexes (higher is more severe).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Informational => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Self::Informational),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            4 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Whether ingesting a finding of this severity raises an alert.
    pub fn is_alerting(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFORMATIONAL" => Ok(Self::Informational),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(Error::validation(format!(
                "invalid severity '{}': must be one of CRITICAL, HIGH, MEDIUM, LOW, INFORMATIONAL",
                other
            ))),
        }
    }
}

/// Status of a finding in the hot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FindingStatus {
    #[default]
    Active,
    Archived,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(Error::validation(format!(
                "invalid status '{}': must be ACTIVE or ARCHIVED",
                other
            ))),
        }
    }
}

/// Per-record archival transition.
///
/// `ColdWritten` is durable: it is evidenced by the presence of the record's
/// cold object, so an interrupted sweep can finish the hot removal later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchivalState {
    Active,
    ColdWritten,
    Archived,
}

impl ArchivalState {
    /// Advance to the next state. Transitions only move forward.
    pub fn advance(self) -> Result<Self> {
        match self {
            Self::Active => Ok(Self::ColdWritten),
            Self::ColdWritten => Ok(Self::Archived),
            Self::Archived => Err(Error::internal("archived record has no further transition")),
        }
    }
}

/// A validated finding as emitted by the event source adapter, before it is
/// stamped by the ingestion processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFinding {
    pub id: String,
    pub severity: Severity,
    pub resource: String,
    pub finding_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A security finding as held in the hot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub resource: String,
    pub finding_type: String,
    pub description: String,
    /// Event time set by the source.
    pub timestamp: DateTime<Utc>,
    /// Set on write.
    pub ingestion_time: DateTime<Utc>,
    /// `ingestion_time` + retention period.
    pub ttl_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: FindingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Finding {
    /// Stamp a normalized finding with its ingestion time and TTL.
    pub fn stamp(
        event: NormalizedFinding,
        ingestion_time: DateTime<Utc>,
        retention: RetentionDays,
    ) -> Self {
        Self {
            id: event.id,
            severity: event.severity,
            resource: event.resource,
            finding_type: event.finding_type,
            description: event.description,
            timestamp: event.timestamp,
            ingestion_time,
            ttl_timestamp: retention.ttl_for(ingestion_time),
            status: FindingStatus::Active,
            title: event.title,
            account_id: event.account_id,
            region: event.region,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FindingStatus::Active
    }

    /// Whether the TTL has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl_timestamp <= now
    }

    /// Version used for last-write-wins comparison.
    pub fn version(&self) -> i64 {
        self.ingestion_time.timestamp_millis()
    }
}
