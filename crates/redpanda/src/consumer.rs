//! Redpanda consumer for the inbound findings topic.
//!
//! Offsets are tracked manually for at-least-once delivery: the caller
//! commits a batch only after every finding in it reached a terminal outcome.

use crate::config::{RedpandaConfig, StartOffset};
use crate::connection::partition_client;
use findings_core::{Error, Result};
use rskafka::client::partition::{OffsetAt, PartitionClient};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Offset tracking for manual commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    pub partition: i32,
    pub offset: i64,
}

/// A raw record payload fetched from the findings topic.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub offset: i64,
    pub payload: Vec<u8>,
}

fn offset_at(start: StartOffset) -> OffsetAt {
    match start {
        StartOffset::Earliest => OffsetAt::Earliest,
        StartOffset::Latest => OffsetAt::Latest,
    }
}

/// Offset to commit after a fetch ending at `max_offset`.
fn next_offset(current: i64, max_offset: Option<i64>) -> Option<i64> {
    max_offset.filter(|&max| max >= current).map(|max| max + 1)
}

/// Consumer for reading findings payloads from Redpanda.
pub struct FindingsConsumer {
    config: RedpandaConfig,
    partition_client: RwLock<Option<Arc<PartitionClient>>>,
    /// Next offset to read
    current_offset: AtomicI64,
    initialized: AtomicBool,
}

impl FindingsConsumer {
    pub fn new(config: RedpandaConfig) -> Self {
        info!(
            topic = %config.findings_topic,
            partition = config.partition,
            brokers = %config.broker_string(),
            "Creating findings consumer"
        );

        Self {
            config,
            partition_client: RwLock::new(None),
            current_offset: AtomicI64::new(-1),
            initialized: AtomicBool::new(false),
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.partition_client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let client = partition_client(&self.config, &self.config.findings_topic).await?;

        if !self.initialized.load(Ordering::SeqCst) {
            let offset = client
                .get_offset(offset_at(self.config.start_offset))
                .await
                .map_err(|e| Error::internal(format!("Failed to get offset: {}", e)))?;

            self.current_offset.store(offset, Ordering::SeqCst);
            self.initialized.store(true, Ordering::SeqCst);

            info!(
                topic = %self.config.findings_topic,
                partition = self.config.partition,
                offset = offset,
                "Consumer initialized at offset"
            );
        }

        *self.partition_client.write().await = Some(client.clone());
        Ok(client)
    }

    /// Fetches the next batch of raw payloads.
    ///
    /// Returns the payloads and the offset to commit once they are processed.
    pub async fn fetch_batch(&self) -> Result<(Vec<FetchedRecord>, Option<Offset>)> {
        let client = self.ensure_connected().await?;
        let current = self.current_offset.load(Ordering::SeqCst);

        let (records, _watermark) = client
            .fetch_records(
                current,
                1..self.config.fetch_max_bytes,
                self.config.fetch_max_wait_ms,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Fetch error");
                Error::internal(format!("Failed to fetch records: {}", e))
            })?;

        let max_offset = records.iter().map(|r| r.offset).max();
        let payloads: Vec<FetchedRecord> = records
            .into_iter()
            .filter_map(|r| {
                r.record.value.map(|payload| FetchedRecord {
                    offset: r.offset,
                    payload,
                })
            })
            .collect();

        if let Some(max) = max_offset {
            debug!(
                payloads = payloads.len(),
                offset_start = current,
                offset_end = max,
                "Fetched batch from Redpanda"
            );
        }

        let commit = next_offset(current, max_offset).map(|offset| Offset {
            partition: self.config.partition,
            offset,
        });

        Ok((payloads, commit))
    }

    /// Commits an offset after successful processing.
    pub async fn commit(&self, offset: Offset) -> Result<()> {
        let prev = self.current_offset.swap(offset.offset, Ordering::SeqCst);
        metrics().consumer_offset.set(offset.offset.max(0) as u64);

        debug!(
            partition = offset.partition,
            prev_offset = prev,
            new_offset = offset.offset,
            "Committed offset"
        );
        Ok(())
    }

    /// Returns the current consumer offset.
    pub fn current_offset(&self) -> i64 {
        self.current_offset.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RedpandaConfig {
        &self.config
    }

    /// Checks if the consumer can reach its partition.
    pub async fn health_check(&self) -> bool {
        match self.ensure_connected().await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Consumer health check failed");
                false
            }
        }
    }

    /// Drops the cached connection so the next fetch reconnects.
    pub async fn reset_connection(&self) {
        *self.partition_client.write().await = None;
        info!("Consumer connection reset");
    }
}
