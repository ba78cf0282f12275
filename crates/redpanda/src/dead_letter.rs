//! Dead-letter sink for findings whose store writes exhausted every retry.
//!
//! Dead letters carry the stamped finding plus the failure that sent it there,
//! so an operator can replay them through the ingestion endpoint unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rskafka::client::partition::{Compression, PartitionClient};
use rskafka::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::RedpandaConfig;
use crate::connection::partition_client;
use findings_core::{Error, Finding, Result};

/// A finding that could not be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub finding: Finding,
    pub error: String,
    pub error_code: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(finding: Finding, error: &Error, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            finding,
            error: error.to_string(),
            error_code: error.code().to_string(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

/// Destination for dead letters.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist a dead letter. An error here means the finding is still
    /// unaccounted for and must not be acknowledged upstream.
    async fn send(&self, letter: DeadLetter) -> Result<()>;
}

/// Dead-letter sink held in memory.
#[derive(Clone, Default)]
pub struct MemoryDeadLetterSink {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured dead letters.
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every dead letter, for replay.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.lock())
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, letter: DeadLetter) -> Result<()> {
        self.letters.lock().push(letter);
        Ok(())
    }
}

/// Dead-letter sink producing to a Redpanda topic.
pub struct RedpandaDeadLetterSink {
    config: RedpandaConfig,
    client: RwLock<Option<Arc<PartitionClient>>>,
}

impl RedpandaDeadLetterSink {
    pub fn new(config: RedpandaConfig) -> Self {
        info!(topic = %config.dead_letter_topic, "Creating Redpanda dead-letter sink");
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    async fn get_client(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let client = partition_client(&self.config, &self.config.dead_letter_topic).await?;
        *self.client.write().await = Some(client.clone());
        Ok(client)
    }
}

fn to_record(letter: &DeadLetter) -> Result<Record> {
    let payload = serde_json::to_vec(letter)?;

    let mut headers = BTreeMap::new();
    headers.insert("error_code".to_string(), letter.error_code.clone().into_bytes());
    headers.insert("attempts".to_string(), letter.attempts.to_string().into_bytes());

    Ok(Record {
        key: Some(letter.finding.id.clone().into_bytes()),
        value: Some(payload),
        headers,
        timestamp: letter.failed_at,
    })
}

#[async_trait]
impl DeadLetterSink for RedpandaDeadLetterSink {
    fn name(&self) -> &'static str {
        "redpanda"
    }

    async fn send(&self, letter: DeadLetter) -> Result<()> {
        let record = to_record(&letter)?;
        let client = self.get_client().await?;

        if let Err(e) = client
            .produce(vec![record], Compression::NoCompression)
            .await
        {
            error!(
                finding_id = %letter.finding.id,
                error = %e,
                "Failed to produce dead letter"
            );
            // Reconnect on the next attempt.
            *self.client.write().await = None;
            return Err(Error::internal(format!("Failed to produce dead letter: {}", e)));
        }
        Ok(())
    }
}
