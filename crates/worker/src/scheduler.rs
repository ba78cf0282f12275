//! Worker scheduler for background tasks.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};

use findings_core::{EventSourceAdapter, PipelineConfig};
use redpanda::FindingsConsumer;

use crate::archival::ArchivalWorker;
use crate::consumer::ConsumerWorker;
use crate::ingest::IngestionProcessor;

/// Worker scheduler configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Archival sweep interval
    pub archival_interval: Duration,
    /// TTL reaper interval
    pub reaper_interval: Duration,
    /// Cold lifecycle pass interval
    pub lifecycle_interval: Duration,
    /// Metrics snapshot log interval
    pub metrics_log_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            archival_interval: Duration::from_secs(3600),     // 1 hour
            reaper_interval: Duration::from_secs(300),        // 5 minutes
            lifecycle_interval: Duration::from_secs(86_400),  // 1 day
            metrics_log_interval: Duration::from_secs(60),    // 1 minute
        }
    }
}

impl WorkerConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            archival_interval: config.archival.interval(),
            reaper_interval: Duration::from_secs(config.archival.ttl_reaper_interval_secs),
            lifecycle_interval: Duration::from_secs(config.archival.lifecycle_interval_secs),
            ..Default::default()
        }
    }
}

/// Streaming ingestion wiring for the consumer worker.
struct StreamingSource {
    consumer: Arc<FindingsConsumer>,
    adapter: EventSourceAdapter,
    processor: Arc<IngestionProcessor>,
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    archival: Arc<ArchivalWorker>,
    streaming: Option<StreamingSource>,
}

impl WorkerScheduler {
    pub fn new(config: WorkerConfig, archival: Arc<ArchivalWorker>) -> Self {
        Self {
            config,
            archival,
            streaming: None,
        }
    }

    /// Adds a consumer for the Redpanda → store pipeline.
    pub fn with_consumer(
        mut self,
        consumer: Arc<FindingsConsumer>,
        adapter: EventSourceAdapter,
        processor: Arc<IngestionProcessor>,
    ) -> Self {
        self.streaming = Some(StreamingSource {
            consumer,
            adapter,
            processor,
        });
        self
    }

    /// Starts all background workers.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(ref streaming) = self.streaming {
            let worker = ConsumerWorker::new(
                streaming.consumer.clone(),
                streaming.adapter.clone(),
                streaming.processor.clone(),
            );
            handles.push(tokio::spawn(
                async move {
                    if let Err(e) = worker.run().await {
                        error!(error = %e, "Consumer worker fatal error");
                    }
                }
                .instrument(info_span!("worker", task = "consumer")),
            ));
            info!("Consumer worker started");
        }

        if self.archival.enabled() {
            let scheduler = self.clone();
            handles.push(tokio::spawn(
                async move { scheduler.run_archival_worker().await }
                    .instrument(info_span!("worker", task = "archival")),
            ));

            let scheduler = self.clone();
            handles.push(tokio::spawn(
                async move { scheduler.run_lifecycle_worker().await }
                    .instrument(info_span!("worker", task = "lifecycle")),
            ));
        } else {
            warn!("No cold storage configured, archival disabled");
        }

        let scheduler = self.clone();
        handles.push(tokio::spawn(
            async move { scheduler.run_reaper().await }
                .instrument(info_span!("worker", task = "reaper")),
        ));

        let scheduler = self.clone();
        handles.push(tokio::spawn(
            async move { scheduler.run_metrics_log().await }
                .instrument(info_span!("worker", task = "metrics")),
        ));

        info!("Background workers started");
        handles
    }

    async fn run_archival_worker(&self) {
        let mut ticker = interval(self.config.archival_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Err(e) = self.archival.sweep().await {
                error!(error = %e, "Archival sweep error");
            }
        }
    }

    async fn run_lifecycle_worker(&self) {
        let mut ticker = interval(self.config.lifecycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Err(e) = self.archival.run_lifecycle(Utc::now()).await {
                error!(error = %e, "Cold lifecycle error");
            }
        }
    }

    async fn run_reaper(&self) {
        let mut ticker = interval(self.config.reaper_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Err(e) = self.archival.reap_expired(Utc::now()).await {
                error!(error = %e, "TTL reaper error");
            }
        }
    }

    async fn run_metrics_log(&self) {
        use telemetry::metrics;

        let mut ticker = interval(self.config.metrics_log_interval);

        loop {
            ticker.tick().await;

            let snapshot = metrics().snapshot();
            info!(
                received = snapshot.findings_received,
                stored = snapshot.findings_stored,
                updated = snapshot.findings_updated,
                rejected = snapshot.findings_rejected,
                dead_lettered = snapshot.dead_lettered,
                alerts_dispatched = snapshot.alerts_dispatched,
                alert_failures = snapshot.alert_delivery_failures,
                archived = snapshot.records_archived,
                archival_failures = snapshot.archival_failures,
                ttl_expired = snapshot.ttl_expired,
                ingest_mean_ms = snapshot.ingest_latency_mean_ms,
                query_mean_ms = snapshot.query_latency_mean_ms,
                "Pipeline metrics"
            );
        }
    }
}
