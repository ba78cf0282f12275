//! Ingestion processor.
//!
//! Stamps normalized findings, upserts them idempotently, and hands HIGH and
//! CRITICAL findings to the alert dispatcher. Store failures are retried with
//! bounded backoff and then routed to the dead-letter sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use telemetry::{health, metrics};
use tracing::{debug, error, info, warn};

use crate::alerts::AlertDispatcher;
use crate::retry::{Exhausted, RetryPolicy};
use findings_core::{
    AdaptedBatch, Error, Finding, NormalizedFinding, PipelineConfig, Rejection, Result,
    StaleEventPolicy,
};
use findings_store::{bounded, FindingsStore, PutOutcome};
use redpanda::{DeadLetter, DeadLetterSink};

/// Terminal outcome of one ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// First write for the id
    Stored,
    /// Replaced an older record
    Updated,
    /// Event time older than the stored record's; nothing written
    Stale,
    /// A concurrent ingestion with a later `ingestion_time` won
    Superseded,
    /// Store retries exhausted; the finding is in the dead-letter sink
    DeadLettered,
}

impl IngestOutcome {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Stored | Self::Updated)
    }
}

/// A finding that could neither be stored nor dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub id: String,
    pub code: String,
    pub reason: String,
}

/// Per-batch ingestion summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub stored: usize,
    pub updated: usize,
    pub stale: usize,
    pub dead_lettered: usize,
    pub filtered: usize,
    pub alerts_dispatched: usize,
    pub rejected: Vec<Rejection>,
    /// Findings left unaccounted for; the source must redeliver them
    #[serde(default)]
    pub failed: Vec<IngestFailure>,
}

impl IngestReport {
    /// Every finding was stored, skipped or dead-lettered.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Stored => self.stored += 1,
            IngestOutcome::Updated => self.updated += 1,
            IngestOutcome::Stale | IngestOutcome::Superseded => self.stale += 1,
            IngestOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: IngestReport) {
        self.received += other.received;
        self.stored += other.stored;
        self.updated += other.updated;
        self.stale += other.stale;
        self.dead_lettered += other.dead_lettered;
        self.filtered += other.filtered;
        self.alerts_dispatched += other.alerts_dispatched;
        self.rejected.extend(other.rejected);
        self.failed.extend(other.failed);
    }
}

/// Upserts findings into the hot store.
///
/// Holds no per-finding state: correctness rests on the store's per-key
/// atomic `put`, so any number of processors can run side by side.
pub struct IngestionProcessor {
    config: Arc<PipelineConfig>,
    store: Arc<dyn FindingsStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    alerts: Arc<AlertDispatcher>,
    retry: RetryPolicy,
    consecutive_failures: AtomicU32,
    escalated: AtomicBool,
}

impl IngestionProcessor {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn FindingsStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        let retry = RetryPolicy::from_settings(&config.retry);
        Self {
            config,
            store,
            dead_letters,
            alerts,
            retry,
            consecutive_failures: AtomicU32::new(0),
            escalated: AtomicBool::new(false),
        }
    }

    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }

    /// Ingest one finding, stamped with the current time.
    ///
    /// Only fails when the finding could neither be stored nor dead-lettered,
    /// in which case the caller must not acknowledge it.
    pub async fn ingest(&self, event: NormalizedFinding) -> Result<IngestOutcome> {
        self.ingest_at(event, Utc::now()).await
    }

    /// Ingest with an explicit ingestion time.
    pub async fn ingest_at(
        &self,
        event: NormalizedFinding,
        ingestion_time: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let start = Instant::now();
        let finding = Finding::stamp(event, ingestion_time, self.config.retention_days);

        let result = match self.stale_check(&finding).await {
            Ok(true) => Ok(IngestOutcome::Stale),
            Ok(false) => self.write(&finding).await,
            Err(exhausted) => Err(exhausted),
        };

        let outcome = match result {
            Ok(outcome) => {
                self.store_recovered();
                outcome
            }
            Err(exhausted) => self.dead_letter(finding.clone(), exhausted).await?,
        };

        match outcome {
            IngestOutcome::Stored => metrics().findings_stored.inc(),
            IngestOutcome::Updated => metrics().findings_updated.inc(),
            IngestOutcome::Stale | IngestOutcome::Superseded => {
                metrics().findings_stale.inc();
                debug!(finding_id = %finding.id, outcome = ?outcome, "Finding not written");
            }
            IngestOutcome::DeadLettered => {}
        }

        if outcome.is_write() {
            self.alerts.dispatch_finding(&finding);
        }

        metrics()
            .ingest_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        Ok(outcome)
    }

    /// Ingest every finding of an adapted batch. Rejections and filtered
    /// findings are carried into the report.
    ///
    /// Every finding is attempted. One that could neither be stored nor
    /// dead-lettered is listed in `failed` and the rest of the batch goes on.
    pub async fn ingest_batch(&self, batch: AdaptedBatch) -> IngestReport {
        let mut report = IngestReport {
            received: batch.total(),
            filtered: batch.filtered,
            rejected: batch.rejected,
            ..Default::default()
        };

        metrics().findings_received.inc_by(report.received as u64);
        metrics().findings_rejected.inc_by(report.rejected.len() as u64);
        metrics().findings_filtered.inc_by(report.filtered as u64);

        for event in batch.findings {
            let id = event.id.clone();
            let alerting = event.severity.is_alerting();
            match self.ingest(event).await {
                Ok(outcome) => {
                    if alerting && outcome.is_write() {
                        report.alerts_dispatched += 1;
                    }
                    report.record(outcome);
                }
                Err(e) => {
                    error!(finding_id = %id, error = %e, "Finding neither stored nor dead-lettered");
                    report.failed.push(IngestFailure {
                        id,
                        code: e.code().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            received = report.received,
            stored = report.stored,
            updated = report.updated,
            stale = report.stale,
            dead_lettered = report.dead_lettered,
            rejected = report.rejected.len(),
            filtered = report.filtered,
            failed = report.failed.len(),
            "Ingested batch"
        );

        report
    }

    /// Whether the stored record has a strictly later event time.
    async fn stale_check(&self, finding: &Finding) -> std::result::Result<bool, Exhausted> {
        if self.config.stale_event_policy == StaleEventPolicy::Overwrite {
            return Ok(false);
        }

        let timeout = self.config.call_timeout();
        let store = &self.store;
        let id = finding.id.as_str();
        let existing = self
            .retry
            .run("store.get", move |_| bounded("store.get", timeout, store.get(id)))
            .await?;

        Ok(existing.is_some_and(|stored| stored.timestamp > finding.timestamp))
    }

    async fn write(&self, finding: &Finding) -> std::result::Result<IngestOutcome, Exhausted> {
        let timeout = self.config.call_timeout();
        let store = &self.store;
        let result = self
            .retry
            .run("store.put", move |attempt| {
                if attempt > 1 {
                    metrics().store_retries.inc();
                }
                bounded("store.put", timeout, store.put(finding.clone()))
            })
            .await?;

        Ok(match result {
            PutOutcome::Inserted => IngestOutcome::Stored,
            PutOutcome::Updated => IngestOutcome::Updated,
            PutOutcome::Superseded => IngestOutcome::Superseded,
        })
    }

    async fn dead_letter(&self, finding: Finding, exhausted: Exhausted) -> Result<IngestOutcome> {
        let Exhausted { error, attempts } = exhausted;
        self.store_failed(&error);

        error!(
            finding_id = %finding.id,
            attempts,
            error = %error,
            sink = self.dead_letters.name(),
            "Store retries exhausted, routing to dead-letter sink"
        );

        let letter = DeadLetter::new(finding, &error, attempts);
        let timeout = self.config.call_timeout();
        match bounded("dead_letter.send", timeout, self.dead_letters.send(letter)).await {
            Ok(()) => {
                metrics().dead_lettered.inc();
                health().dead_letter.set_healthy();
                Ok(IngestOutcome::DeadLettered)
            }
            Err(e) => {
                error!(error = %e, "Dead-letter sink unavailable");
                health().dead_letter.set_unhealthy(e.to_string());
                Err(e)
            }
        }
    }

    fn store_recovered(&self) {
        if self.consecutive_failures.swap(0, Ordering::SeqCst) > 0 {
            health().store.set_healthy();
            if self.escalated.swap(false, Ordering::SeqCst) {
                info!("Findings store recovered");
            }
        }
    }

    /// Count a store-level failure and escalate once the configured number
    /// of consecutive failures is reached.
    fn store_failed(&self, error: &Error) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = self.config.alerts.escalation_threshold;

        if failures >= threshold && !self.escalated.swap(true, Ordering::SeqCst) {
            health().store.set_unhealthy(error.to_string());
            warn!(failures, threshold, "Findings store unavailable, escalating");
            self.alerts.dispatch_operational(format!(
                "Findings store ({}) failed {} consecutive ingestions: {}",
                self.store.backend(),
                failures,
                error
            ));
        }
    }
}
