//! Query service.
//!
//! Read-only view over the findings store. Every parameter is validated and
//! clamped here so that handlers only ever see a well-formed request or a
//! structured rejection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::IntErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::debug;

use findings_core::limits::MAX_FINDING_ID_LEN;
use findings_core::{Error, Finding, FindingStatus, PipelineConfig, Result, Severity};
use findings_store::{bounded, FindingsStore, PageCursor, QueryFilter};

/// Service name reported by the health operation.
pub const SERVICE_NAME: &str = "findings-pipeline";

/// Raw list parameters as received on the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub severity: Option<String>,
    pub status: Option<String>,
    pub cursor: Option<String>,
    /// Kept as text so a malformed value is a structured rejection
    pub limit: Option<String>,
}

/// One page of findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingsPage {
    pub items: Vec<Finding>,
    pub next_cursor: Option<String>,
}

/// Severity breakdown over ACTIVE findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_findings: u64,
    pub severity_breakdown: BTreeMap<String, u64>,
    pub last_updated: DateTime<Utc>,
}

/// Liveness answer. Never consults the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

/// A validated list request.
#[derive(Debug, Clone, PartialEq)]
struct ListRequest {
    filter: QueryFilter,
    cursor: Option<PageCursor>,
    limit: usize,
}

/// Stateless read path over the findings store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn FindingsStore>,
    default_limit: usize,
    max_limit: usize,
    timeout: Duration,
}

impl QueryService {
    pub fn new(config: &PipelineConfig, store: Arc<dyn FindingsStore>) -> Self {
        Self {
            store,
            default_limit: config.default_query_limit,
            max_limit: config.max_query_limit,
            timeout: config.call_timeout(),
        }
    }

    /// List findings ordered by severity (most severe first), then event
    /// time (newest first).
    pub async fn list_findings(&self, params: &ListParams) -> Result<FindingsPage> {
        let start = Instant::now();
        let request = self.validate(params).inspect_err(|_| {
            metrics().queries_rejected.inc();
        })?;

        let page = bounded(
            "store.query",
            self.timeout,
            self.store
                .query(request.filter, request.cursor.as_ref(), request.limit),
        )
        .await?;

        debug!(
            severity = ?request.filter.severity,
            status = request.filter.status.as_str(),
            limit = request.limit,
            returned = page.items.len(),
            "Listed findings"
        );

        metrics().queries_served.inc();
        metrics()
            .query_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        Ok(FindingsPage {
            items: page.items,
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
    }

    /// Point lookup. Unknown ids are [`Error::NotFound`].
    pub async fn get_finding(&self, id: &str) -> Result<Finding> {
        let len = id.chars().count();
        if len == 0 || len > MAX_FINDING_ID_LEN {
            metrics().queries_rejected.inc();
            return Err(Error::invalid_query(format!(
                "finding id must be 1-{} characters",
                MAX_FINDING_ID_LEN
            )));
        }

        let finding = bounded("store.get", self.timeout, self.store.get(id))
            .await?
            .ok_or_else(|| Error::not_found(format!("finding '{}' not found", id)))?;

        metrics().queries_served.inc();
        Ok(finding)
    }

    /// Counts of ACTIVE findings per severity.
    pub async fn summary(&self) -> Result<Summary> {
        let counts = bounded(
            "store.count_by_severity",
            self.timeout,
            self.store.count_by_severity(),
        )
        .await?;

        let severity_breakdown: BTreeMap<String, u64> = Severity::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), counts.get(s).copied().unwrap_or(0)))
            .collect();

        metrics().queries_served.inc();
        Ok(Summary {
            total_findings: severity_breakdown.values().sum(),
            severity_breakdown,
            last_updated: Utc::now(),
        })
    }

    /// Fixed healthy answer.
    pub fn health(&self) -> ServiceHealth {
        ServiceHealth {
            status: "healthy".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn validate(&self, params: &ListParams) -> Result<ListRequest> {
        let severity = non_empty(&params.severity)
            .map(|s| {
                s.parse::<Severity>()
                    .map_err(|e| Error::invalid_query(e.to_string()))
            })
            .transpose()?;

        let status = non_empty(&params.status)
            .map(|s| {
                s.parse::<FindingStatus>()
                    .map_err(|e| Error::invalid_query(e.to_string()))
            })
            .transpose()?
            .unwrap_or_default();

        let cursor = non_empty(&params.cursor)
            .map(PageCursor::decode)
            .transpose()?;

        if let (Some(severity), Some(cursor)) = (severity, &cursor) {
            if cursor.severity() != Some(severity) {
                return Err(Error::invalid_query(
                    "cursor does not belong to the requested severity",
                ));
            }
        }

        Ok(ListRequest {
            filter: QueryFilter { severity, status },
            cursor,
            limit: self.clamp_limit(params.limit.as_deref())?,
        })
    }

    /// Missing means default; over the maximum is clamped; anything that is
    /// not a positive integer is rejected.
    fn clamp_limit(&self, raw: Option<&str>) -> Result<usize> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(self.default_limit);
        };

        let limit: i64 = match raw.parse() {
            Ok(limit) => limit,
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => return Ok(self.max_limit),
                IntErrorKind::NegOverflow => {
                    return Err(Error::invalid_query("limit must be at least 1"))
                }
                _ => {
                    return Err(Error::invalid_query(format!(
                        "limit '{}' is not an integer",
                        raw
                    )))
                }
            },
        };

        if limit < 1 {
            return Err(Error::invalid_query("limit must be at least 1"));
        }

        Ok((limit as u64).min(self.max_limit as u64) as usize)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
