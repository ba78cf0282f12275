//! ClickHouse configuration.

use serde::{Deserialize, Serialize};

/// ClickHouse client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// ClickHouse HTTP URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Database name
    #[serde(default = "default_database")]
    pub database: String,
    /// Username (optional)
    #[serde(default)]
    pub username: Option<String>,
    /// Password (optional)
    #[serde(default)]
    pub password: Option<String>,
    /// Create the database and findings table on startup
    #[serde(default = "default_init_schema")]
    pub init_schema: bool,
    /// LZ4-compress inserts and results
    #[serde(default = "default_compression")]
    pub compression: bool,
    /// Server-side limit for any one query, in seconds
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Wait for hot deletes to apply before returning, so an archived
    /// record never shows up in a query after its removal was confirmed
    #[serde(default = "default_sync_deletes")]
    pub sync_deletes: bool,
    /// Tag written to `system.query_log` for every query we issue
    #[serde(default = "default_query_tag")]
    pub query_tag: String,
}

fn default_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_database() -> String {
    "findings".to_string()
}

fn default_init_schema() -> bool {
    true
}

fn default_compression() -> bool {
    true
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_sync_deletes() -> bool {
    true
}

fn default_query_tag() -> String {
    "findings-pipeline".to_string()
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            username: None,
            password: None,
            init_schema: default_init_schema(),
            compression: default_compression(),
            query_timeout_secs: default_query_timeout_secs(),
            sync_deletes: default_sync_deletes(),
            query_tag: default_query_tag(),
        }
    }
}
