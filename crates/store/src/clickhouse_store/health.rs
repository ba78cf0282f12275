//! ClickHouse health checks and schema bootstrap.

use super::client::ClickHouseClient;
use super::schema::{create_database, create_findings_table};
use crate::store::PurgeScope;
use findings_core::{Error, Result};
use tracing::{debug, error};

/// Check ClickHouse connection health.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client.inner().query("SELECT 1").fetch_one::<u8>().await {
        Ok(_) => {
            debug!("ClickHouse connection healthy");
            true
        }
        Err(e) => {
            error!(error = %e, "ClickHouse health check failed");
            false
        }
    }
}

/// Create the database and findings table if missing.
pub async fn init_schema(
    client: &ClickHouseClient,
    table: &str,
    ttl_scope: PurgeScope,
) -> Result<()> {
    let database = &client.config().database;

    for ddl in [
        create_database(database),
        create_findings_table(database, table, ttl_scope),
    ] {
        client
            .inner()
            .query(&ddl)
            .execute()
            .await
            .map_err(|e| Error::transient_store(format!("Failed to execute DDL: {}", e)))?;
    }

    debug!(database = %database, table = %table, "ClickHouse schema initialized");
    Ok(())
}
