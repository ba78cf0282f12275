//! Findings store over a ClickHouse `ReplacingMergeTree` table.
//!
//! Reads use `FINAL` so replaced versions never surface. A tombstone is a new
//! row version with status ARCHIVED; a hard delete is a lightweight `DELETE`
//! conditioned on the record's `ingestion_time`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use super::client::ClickHouseClient;
use super::health::{check_connection, init_schema};
use super::schema::validate_identifier;
use crate::cursor::{ExpiryCursor, PageCursor};
use crate::store::{
    ExpiringPage, FindingsStore, PurgeScope, PutOutcome, QueryFilter, QueryPage,
};
use findings_core::{Error, Finding, FindingStatus, Result, Severity};

const SELECT_FIELDS: &str = "id, severity, severity_rank, resource, finding_type, description, \
     title, account_id, region, timestamp, ingestion_time, ttl_timestamp, status, version";

/// Row format for the findings table. `DateTime64(3)` travels as epoch
/// milliseconds in RowBinary.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct FindingRow {
    pub id: String,
    pub severity: String,
    pub severity_rank: u8,
    pub resource: String,
    pub finding_type: String,
    pub description: String,
    pub title: Option<String>,
    pub account_id: Option<String>,
    pub region: Option<String>,
    pub timestamp: i64,
    pub ingestion_time: i64,
    pub ttl_timestamp: i64,
    pub status: String,
    pub version: u64,
}

/// Row version: ingestion order first, tombstones above their live row.
fn row_version(finding: &Finding) -> u64 {
    let base = (finding.version().max(0) as u64) << 1;
    match finding.status {
        FindingStatus::Active => base,
        FindingStatus::Archived => base | 1,
    }
}

impl From<&Finding> for FindingRow {
    fn from(finding: &Finding) -> Self {
        Self {
            id: finding.id.clone(),
            severity: finding.severity.as_str().to_string(),
            severity_rank: finding.severity.rank(),
            resource: finding.resource.clone(),
            finding_type: finding.finding_type.clone(),
            description: finding.description.clone(),
            title: finding.title.clone(),
            account_id: finding.account_id.clone(),
            region: finding.region.clone(),
            timestamp: finding.timestamp.timestamp_millis(),
            ingestion_time: finding.ingestion_time.timestamp_millis(),
            ttl_timestamp: finding.ttl_timestamp.timestamp_millis(),
            status: finding.status.as_str().to_string(),
            version: row_version(finding),
        }
    }
}

fn millis(field: &str, value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| Error::internal(format!("stored {} out of range: {}", field, value)))
}

impl TryFrom<FindingRow> for Finding {
    type Error = Error;

    fn try_from(row: FindingRow) -> Result<Self> {
        let severity = Severity::from_rank(row.severity_rank).ok_or_else(|| {
            Error::internal(format!("stored severity rank {} is unknown", row.severity_rank))
        })?;

        Ok(Self {
            timestamp: millis("timestamp", row.timestamp)?,
            ingestion_time: millis("ingestion_time", row.ingestion_time)?,
            ttl_timestamp: millis("ttl_timestamp", row.ttl_timestamp)?,
            status: row.status.parse()?,
            id: row.id,
            severity,
            resource: row.resource,
            finding_type: row.finding_type,
            description: row.description,
            title: row.title,
            account_id: row.account_id,
            region: row.region,
        })
    }
}

#[derive(Debug, Row, Deserialize)]
struct SeverityCount {
    severity_rank: u8,
    count: u64,
}

fn store_err(context: &str, e: clickhouse::error::Error) -> Error {
    Error::transient_store(format!("{}: {}", context, e))
}

/// Keyset predicate selecting rows strictly after `cursor` in
/// `(severity_rank desc, timestamp desc, id asc)` order.
const AFTER_PAGE_CURSOR: &str = "(severity_rank < ? \
     OR (severity_rank = ? AND timestamp < fromUnixTimestamp64Milli(toInt64(?))) \
     OR (severity_rank = ? AND timestamp = fromUnixTimestamp64Milli(toInt64(?)) AND id > ?))";

const AFTER_EXPIRY_CURSOR: &str = "(ttl_timestamp > fromUnixTimestamp64Milli(toInt64(?)) \
     OR (ttl_timestamp = fromUnixTimestamp64Milli(toInt64(?)) AND id > ?))";

/// ClickHouse findings store.
pub struct ClickHouseFindingsStore {
    client: ClickHouseClient,
    table: String,
    /// `database.table`
    qualified: String,
    /// Rows the table TTL may drop
    ttl_scope: PurgeScope,
}

impl ClickHouseFindingsStore {
    pub fn new(client: ClickHouseClient, table: &str) -> Result<Self> {
        validate_identifier("table_name", table)?;
        let qualified = format!("{}.{}", client.config().database, table);
        Ok(Self {
            client,
            table: table.to_string(),
            qualified,
            ttl_scope: PurgeScope::AnyStatus,
        })
    }

    /// Restrict the table TTL to archived rows. Used whenever cold storage
    /// is configured, so expiry never removes a record that was not archived.
    pub fn with_ttl_scope(mut self, ttl_scope: PurgeScope) -> Self {
        self.ttl_scope = ttl_scope;
        self
    }

    /// Create the schema when configured to and verify connectivity.
    pub async fn initialize(&self) -> Result<()> {
        if self.client.config().init_schema {
            init_schema(&self.client, &self.table, self.ttl_scope).await?;
        }
        if !check_connection(&self.client).await {
            return Err(Error::transient_store("ClickHouse is not reachable"));
        }
        info!(table = %self.qualified, "ClickHouse findings store ready");
        Ok(())
    }

    async fn insert_row(&self, row: &FindingRow) -> Result<()> {
        let mut insert = self
            .client
            .inner()
            .insert::<FindingRow>(&self.qualified)
            .map_err(|e| store_err("Insert error", e))?;

        insert
            .write(row)
            .await
            .map_err(|e| store_err("Write error", e))?;

        insert.end().await.map_err(|e| store_err("End error", e))
    }

    /// Fetch the current version of a record, honoring the version condition.
    async fn current(&self, id: &str, expected_version: Option<i64>) -> Result<Option<Finding>> {
        let Some(existing) = self.get(id).await? else {
            return Ok(None);
        };
        match expected_version {
            Some(version) if existing.version() != version => Ok(None),
            _ => Ok(Some(existing)),
        }
    }
}

#[async_trait]
impl FindingsStore for ClickHouseFindingsStore {
    fn backend(&self) -> &'static str {
        "clickhouse"
    }

    async fn put(&self, finding: Finding) -> Result<PutOutcome> {
        let outcome = match self.get(&finding.id).await? {
            None => PutOutcome::Inserted,
            Some(existing) if existing.ingestion_time > finding.ingestion_time => {
                return Ok(PutOutcome::Superseded);
            }
            Some(_) => PutOutcome::Updated,
        };

        // A concurrent writer that slips in between the read and the insert
        // is still resolved by the engine on `version`.
        self.insert_row(&FindingRow::from(&finding)).await?;
        Ok(outcome)
    }

    async fn get(&self, id: &str) -> Result<Option<Finding>> {
        let sql = format!(
            "SELECT {} FROM {} FINAL WHERE id = ? LIMIT 1",
            SELECT_FIELDS, self.qualified
        );
        let row = self
            .client
            .inner()
            .query(&sql)
            .bind(id)
            .fetch_optional::<FindingRow>()
            .await
            .map_err(|e| store_err("Query error", e))?;

        row.map(Finding::try_from).transpose()
    }

    async fn query(
        &self,
        filter: QueryFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<QueryPage> {
        let start = Instant::now();

        let mut sql = format!(
            "SELECT {} FROM {} FINAL WHERE status = ?",
            SELECT_FIELDS, self.qualified
        );
        if filter.severity.is_some() {
            sql.push_str(" AND severity_rank = ?");
        }
        if cursor.is_some() {
            sql.push_str(" AND ");
            sql.push_str(AFTER_PAGE_CURSOR);
        }
        sql.push_str(" ORDER BY severity_rank DESC, timestamp DESC, id ASC LIMIT ?");

        let mut query = self.client.inner().query(&sql).bind(filter.status.as_str());
        if let Some(severity) = filter.severity {
            query = query.bind(severity.rank());
        }
        if let Some(cursor) = cursor {
            query = query
                .bind(cursor.severity_rank)
                .bind(cursor.severity_rank)
                .bind(cursor.timestamp_ms)
                .bind(cursor.severity_rank)
                .bind(cursor.timestamp_ms)
                .bind(cursor.id.as_str());
        }
        // One extra row tells whether another page follows.
        let rows = query
            .bind(limit as u64 + 1)
            .fetch_all::<FindingRow>()
            .await
            .map_err(|e| store_err("Query error", e))?;

        let mut items = rows
            .into_iter()
            .map(Finding::try_from)
            .collect::<Result<Vec<_>>>()?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(PageCursor::after)
        } else {
            None
        };

        debug!(
            count = items.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Queried findings"
        );
        Ok(QueryPage { items, next_cursor })
    }

    async fn delete(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        let Some(existing) = self.current(id, expected_version).await? else {
            return Ok(false);
        };

        let sql = format!(
            "DELETE FROM {} WHERE id = ? AND ingestion_time = fromUnixTimestamp64Milli(toInt64(?))",
            self.qualified
        );
        self.client
            .inner()
            .query(&sql)
            .bind(id)
            .bind(existing.version())
            .execute()
            .await
            .map_err(|e| store_err("Delete error", e))?;

        Ok(true)
    }

    async fn mark_archived(&self, id: &str, expected_version: Option<i64>) -> Result<bool> {
        let Some(mut existing) = self.current(id, expected_version).await? else {
            return Ok(false);
        };
        existing.status = FindingStatus::Archived;
        self.insert_row(&FindingRow::from(&existing)).await?;
        Ok(true)
    }

    async fn expiring(
        &self,
        before: DateTime<Utc>,
        cursor: Option<&ExpiryCursor>,
        limit: usize,
    ) -> Result<ExpiringPage> {
        let mut sql = format!(
            "SELECT {} FROM {} FINAL WHERE status = ? \
             AND ttl_timestamp <= fromUnixTimestamp64Milli(toInt64(?))",
            SELECT_FIELDS, self.qualified
        );
        if cursor.is_some() {
            sql.push_str(" AND ");
            sql.push_str(AFTER_EXPIRY_CURSOR);
        }
        sql.push_str(" ORDER BY ttl_timestamp ASC, id ASC LIMIT ?");

        let mut query = self
            .client
            .inner()
            .query(&sql)
            .bind(FindingStatus::Active.as_str())
            .bind(before.timestamp_millis());
        if let Some(cursor) = cursor {
            query = query
                .bind(cursor.ttl_ms)
                .bind(cursor.ttl_ms)
                .bind(cursor.id.as_str());
        }
        let rows = query
            .bind(limit as u64 + 1)
            .fetch_all::<FindingRow>()
            .await
            .map_err(|e| store_err("Query error", e))?;

        let mut items = rows
            .into_iter()
            .map(Finding::try_from)
            .collect::<Result<Vec<_>>>()?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(ExpiryCursor::after)
        } else {
            None
        };

        Ok(ExpiringPage { items, next_cursor })
    }

    async fn count_by_severity(&self) -> Result<BTreeMap<Severity, u64>> {
        let sql = format!(
            "SELECT severity_rank, count() AS count FROM {} FINAL \
             WHERE status = ? GROUP BY severity_rank",
            self.qualified
        );
        let rows = self
            .client
            .inner()
            .query(&sql)
            .bind(FindingStatus::Active.as_str())
            .fetch_all::<SeverityCount>()
            .await
            .map_err(|e| store_err("Query error", e))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| Severity::from_rank(row.severity_rank).map(|s| (s, row.count)))
            .collect())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>, _scope: PurgeScope) -> Result<u64> {
        // Expiry runs inside ClickHouse through the table TTL, scoped by
        // `ttl_scope` when the table is created.
        Ok(0)
    }

    async fn ping(&self) -> Result<()> {
        if check_connection(&self.client).await {
            Ok(())
        } else {
            Err(Error::transient_store("ClickHouse ping failed"))
        }
    }
}
