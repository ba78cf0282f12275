//! Redpanda configuration.

use serde::{Deserialize, Serialize};

/// Where a consumer starts when it has no committed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    Earliest,
    #[default]
    Latest,
}

/// Redpanda connection and topic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedpandaConfig {
    /// Broker addresses; streaming ingestion is disabled when empty
    #[serde(default)]
    pub brokers: Vec<String>,
    /// SASL username (for cloud authentication)
    #[serde(default)]
    pub sasl_username: Option<String>,
    /// SASL password (for cloud authentication)
    #[serde(default)]
    pub sasl_password: Option<String>,
    /// Inbound findings topic
    #[serde(default = "default_findings_topic")]
    pub findings_topic: String,
    /// Dead-letter topic for findings that exhausted store retries
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,
    #[serde(default)]
    pub partition: i32,
    #[serde(default)]
    pub start_offset: StartOffset,
    /// Upper bound on bytes per fetch
    #[serde(default = "default_fetch_max_bytes")]
    pub fetch_max_bytes: i32,
    /// Broker-side wait for a fetch to fill
    #[serde(default = "default_fetch_max_wait_ms")]
    pub fetch_max_wait_ms: i32,
    /// Sleep between empty polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_findings_topic() -> String {
    "security-findings".to_string()
}

fn default_dead_letter_topic() -> String {
    "security-findings-dlq".to_string()
}

fn default_fetch_max_bytes() -> i32 {
    4 * 1024 * 1024
}

fn default_fetch_max_wait_ms() -> i32 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for RedpandaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            sasl_username: None,
            sasl_password: None,
            findings_topic: default_findings_topic(),
            dead_letter_topic: default_dead_letter_topic(),
            partition: 0,
            start_offset: StartOffset::default(),
            fetch_max_bytes: default_fetch_max_bytes(),
            fetch_max_wait_ms: default_fetch_max_wait_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl RedpandaConfig {
    /// Returns the broker list as a comma-separated string.
    pub fn broker_string(&self) -> String {
        self.brokers.join(",")
    }

    pub fn enabled(&self) -> bool {
        self.brokers.iter().any(|b| !b.trim().is_empty())
    }

    /// Credentials, when both halves are configured.
    pub fn sasl_credentials(&self) -> Option<(&str, &str)> {
        match (&self.sasl_username, &self.sasl_password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}
