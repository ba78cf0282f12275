//! Pipeline configuration.
//!
//! Built once at process start and shared by reference with every component.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::finding::Severity;
use crate::limits::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::retention::{ColdLifecyclePolicy, RetentionDays};

/// What to do with a re-ingested finding whose event time is older than the
/// stored record's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StaleEventPolicy {
    /// Keep the stored record, report the event as stale
    #[default]
    Ignore,
    /// Last arrival wins regardless of event time
    Overwrite,
}

/// How an archived record leaves the hot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HotRemoval {
    #[default]
    Delete,
    /// Keep a tombstone with status ARCHIVED
    Tombstone,
}

/// Retry policy settings for store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Archival worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalSettings {
    /// Sweep interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Time budget per sweep in seconds; must be below the interval
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    /// Records archived concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Records fetched per store page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub hot_removal: HotRemoval,
    /// TTL reaper interval in seconds
    #[serde(default = "default_ttl_reaper_interval_secs")]
    pub ttl_reaper_interval_secs: u64,
    /// Cold lifecycle pass interval in seconds
    #[serde(default = "default_lifecycle_interval_secs")]
    pub lifecycle_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_time_budget_secs() -> u64 {
    3000
}

fn default_concurrency() -> usize {
    8
}

fn default_page_size() -> usize {
    100
}

fn default_ttl_reaper_interval_secs() -> u64 {
    300
}

fn default_lifecycle_interval_secs() -> u64 {
    86_400
}

impl Default for ArchivalSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            time_budget_secs: default_time_budget_secs(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            hot_removal: HotRemoval::default(),
            ttl_reaper_interval_secs: default_ttl_reaper_interval_secs(),
            lifecycle_interval_secs: default_lifecycle_interval_secs(),
        }
    }
}

impl ArchivalSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Webhook for the standard tier
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Webhook for the critical-escalation tier
    #[serde(default)]
    pub escalation_webhook_url: Option<String>,
    /// Delivery attempts per channel
    #[serde(default = "default_alert_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_alert_backoff_ms")]
    pub backoff_ms: u64,
    /// Consecutive store failures before an operational alert
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

fn default_alert_attempts() -> u32 {
    5
}

fn default_alert_backoff_ms() -> u64 {
    500
}

fn default_escalation_threshold() -> u32 {
    5
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            escalation_webhook_url: None,
            max_attempts: default_alert_attempts(),
            backoff_ms: default_alert_backoff_ms(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

/// Pipeline configuration shared by every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hot store table name
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Notification channel identifier attached to every alert
    #[serde(default = "default_notification_channel_id")]
    pub notification_channel_id: String,
    #[serde(default)]
    pub retention_days: RetentionDays,
    /// Cold storage location; archival is disabled when absent
    #[serde(default)]
    pub cold_storage_bucket: Option<String>,
    /// Records whose TTL falls within this window are archived
    #[serde(default = "default_lookahead_window_secs")]
    pub lookahead_window_secs: u64,
    /// Findings below this severity are dropped at the adapter
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,
    #[serde(default = "default_max_query_limit")]
    pub max_query_limit: usize,
    /// Bound on every external call (store, cold storage, channels)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default)]
    pub stale_event_policy: StaleEventPolicy,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub archival: ArchivalSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub cold_tiers: ColdLifecyclePolicy,
}

fn default_table_name() -> String {
    "security_findings".to_string()
}

fn default_notification_channel_id() -> String {
    "security-alerts".to_string()
}

fn default_lookahead_window_secs() -> u64 {
    24 * 3600
}

fn default_min_severity() -> Severity {
    Severity::Informational
}

fn default_query_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

fn default_max_query_limit() -> usize {
    MAX_QUERY_LIMIT
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            notification_channel_id: default_notification_channel_id(),
            retention_days: RetentionDays::default(),
            cold_storage_bucket: None,
            lookahead_window_secs: default_lookahead_window_secs(),
            min_severity: default_min_severity(),
            default_query_limit: default_query_limit(),
            max_query_limit: default_max_query_limit(),
            call_timeout_ms: default_call_timeout_ms(),
            stale_event_policy: StaleEventPolicy::default(),
            retry: RetrySettings::default(),
            archival: ArchivalSettings::default(),
            alerts: AlertSettings::default(),
            cold_tiers: ColdLifecyclePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn lookahead_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookahead_window_secs as i64)
    }

    pub fn archival_enabled(&self) -> bool {
        self.cold_storage_bucket
            .as_deref()
            .is_some_and(|b| !b.trim().is_empty())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(Error::config("table_name must not be empty"));
        }
        if self.notification_channel_id.trim().is_empty() {
            return Err(Error::config("notification_channel_id must not be empty"));
        }
        if self.max_query_limit == 0 || self.max_query_limit > MAX_QUERY_LIMIT {
            return Err(Error::config(format!(
                "max_query_limit must be within 1-{}",
                MAX_QUERY_LIMIT
            )));
        }
        if self.default_query_limit == 0 || self.default_query_limit > self.max_query_limit {
            return Err(Error::config(
                "default_query_limit must be within 1-max_query_limit",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::config("call_timeout_ms must be positive"));
        }
        if self.retry.max_attempts == 0 || self.retry.multiplier == 0 {
            return Err(Error::config(
                "retry.max_attempts and retry.multiplier must be positive",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config("retry.base_delay_ms exceeds retry.max_delay_ms"));
        }
        if self.archival.concurrency == 0 || self.archival.page_size == 0 {
            return Err(Error::config(
                "archival.concurrency and archival.page_size must be positive",
            ));
        }
        if self.archival.time_budget_secs >= self.archival.interval_secs {
            return Err(Error::config(
                "archival.time_budget_secs must be below archival.interval_secs",
            ));
        }
        for url in [&self.alerts.webhook_url, &self.alerts.escalation_webhook_url]
            .into_iter()
            .flatten()
        {
            url::Url::parse(url)
                .map_err(|e| Error::config(format!("invalid webhook url '{}': {}", url, e)))?;
        }
        self.cold_tiers.validate()
    }
}
