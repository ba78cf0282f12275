//! ClickHouse connection for the findings table.

use super::config::ClickHouseConfig;
use super::schema::validate_identifier;
use clickhouse::{Client, Compression};
use findings_core::{Error, Result};
use tracing::info;

/// Per-query settings sent with every request.
fn query_settings(config: &ClickHouseConfig) -> Vec<(&'static str, String)> {
    let mut settings = vec![
        ("max_execution_time", config.query_timeout_secs.to_string()),
        ("log_comment", config.query_tag.clone()),
    ];
    if config.sync_deletes {
        // Lightweight DELETE runs as a mutation; wait for it on this replica.
        settings.push(("mutations_sync", "1".to_string()));
    }
    settings
}

/// Client for the findings database.
///
/// The database is not set on the connection: the store qualifies every
/// table as `database.table`, and schema setup must run before the
/// database exists.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    /// The database name is interpolated into DDL and queries, so it must be
    /// a plain identifier.
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        validate_identifier("database", &config.database)?;
        if config.query_timeout_secs == 0 {
            return Err(Error::config("clickhouse.query_timeout_secs must be positive"));
        }

        let compression = if config.compression {
            Compression::Lz4
        } else {
            Compression::None
        };
        let mut client = Client::default()
            .with_url(&config.url)
            .with_compression(compression);

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }
        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }
        for (name, value) in query_settings(&config) {
            client = client.with_option(name, value);
        }

        info!(
            url = %config.url,
            database = %config.database,
            compression = config.compression,
            query_timeout_secs = config.query_timeout_secs,
            sync_deletes = config.sync_deletes,
            "Connected findings store to ClickHouse"
        );

        Ok(Self {
            inner: client,
            config,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }
}
