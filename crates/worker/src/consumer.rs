//! Consumer worker for reading findings from Redpanda.
//!
//! This worker drives the streaming ingestion path:
//! 1. Fetch a batch of payloads from the findings topic
//! 2. Adapt each payload and ingest its findings
//! 3. Commit the offset once every finding is stored or dead-lettered
//! 4. Repeat
//!
//! A batch is never committed while a finding is unaccounted for, so delivery
//! is at-least-once and the upsert keeps redelivery idempotent.

use std::sync::Arc;
use std::time::Duration;
use telemetry::{health, metrics};
use tracing::{debug, error, info, warn};

use crate::ingest::{IngestReport, IngestionProcessor};
use findings_core::{Error, EventSourceAdapter, Rejection, Result};
use redpanda::{FetchedRecord, FindingsConsumer};

/// Consumer worker configuration.
#[derive(Debug, Clone)]
pub struct ConsumerWorkerConfig {
    /// Pause after an empty fetch
    pub poll_interval: Duration,
    /// Pause after a failed batch before reconnecting
    pub error_backoff: Duration,
}

impl Default for ConsumerWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Worker that consumes findings payloads and feeds the ingestion processor.
pub struct ConsumerWorker {
    consumer: Arc<FindingsConsumer>,
    adapter: EventSourceAdapter,
    processor: Arc<IngestionProcessor>,
    config: ConsumerWorkerConfig,
}

impl ConsumerWorker {
    pub fn new(
        consumer: Arc<FindingsConsumer>,
        adapter: EventSourceAdapter,
        processor: Arc<IngestionProcessor>,
    ) -> Self {
        let config = ConsumerWorkerConfig {
            poll_interval: Duration::from_millis(consumer.config().poll_interval_ms),
            ..Default::default()
        };
        Self::with_config(consumer, adapter, processor, config)
    }

    pub fn with_config(
        consumer: Arc<FindingsConsumer>,
        adapter: EventSourceAdapter,
        processor: Arc<IngestionProcessor>,
        config: ConsumerWorkerConfig,
    ) -> Self {
        Self {
            consumer,
            adapter,
            processor,
            config,
        }
    }

    /// Main run loop - fetch, ingest, commit.
    ///
    /// This runs indefinitely, processing batches of findings.
    pub async fn run(&self) -> Result<()> {
        info!(
            topic = %self.consumer.config().findings_topic,
            partition = self.consumer.config().partition,
            min_severity = %self.adapter.min_severity(),
            "Consumer worker starting"
        );

        loop {
            match self.process_batch().await {
                Ok(0) => tokio::time::sleep(self.config.poll_interval).await,
                Ok(count) => debug!(count, "Processed batch"),
                Err(e) => {
                    error!(error = %e, "Batch processing error");
                    health().event_source.set_unhealthy(e.to_string());
                    tokio::time::sleep(self.config.error_backoff).await;
                    self.consumer.reset_connection().await;
                }
            }
        }
    }

    /// Processes a single batch: fetch → ingest → commit.
    async fn process_batch(&self) -> Result<usize> {
        let (records, offset) = self.consumer.fetch_batch().await?;
        health().event_source.set_healthy();

        if records.is_empty() {
            // Tombstones and empty values still move the offset forward
            if let Some(offset) = offset {
                self.consumer.commit(offset).await?;
            }
            return Ok(0);
        }

        let report = ingest_records(&self.adapter, &self.processor, records).await;
        if !report.is_complete() {
            // Leave the offset so the whole fetch is redelivered
            return Err(Error::transient_store(format!(
                "{} findings neither stored nor dead-lettered",
                report.failed.len()
            )));
        }

        if let Some(offset) = offset {
            self.consumer.commit(offset).await?;
        }

        Ok(report.received)
    }
}

/// Adapt and ingest fetched payloads.
///
/// A payload that cannot be adapted at all (not JSON, unknown shape) can
/// never succeed on redelivery; it is logged and counted as rejected.
/// Findings neither stored nor dead-lettered are listed in `failed`.
pub async fn ingest_records(
    adapter: &EventSourceAdapter,
    processor: &IngestionProcessor,
    records: Vec<FetchedRecord>,
) -> IngestReport {
    let mut total = IngestReport::default();

    for record in records {
        let batch = match adapter.adapt(&record.payload) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(offset = record.offset, error = %e, "Dropping unreadable payload");
                metrics().findings_rejected.inc();
                total.received += 1;
                total.rejected.push(Rejection {
                    index: 0,
                    id: None,
                    reason: format!("offset {}: {}", record.offset, e),
                });
                continue;
            }
        };

        let report = processor.ingest_batch(batch).await;
        total.merge(report);
    }

    total
}
