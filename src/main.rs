//! Security Findings Pipeline
//!
//! Ingests security findings, keeps them queryable in a hot store, alerts on
//! HIGH and CRITICAL findings, and archives records nearing their TTL:
//! - Event source adaptation and validation
//! - Idempotent upserts with retry and dead-lettering
//! - Severity-ordered, cursor-paginated queries
//! - Cold-write-then-hot-delete archival with cold tier lifecycle

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn, Instrument};

use api::{router, AppState};
use findings_core::{EventSourceAdapter, PipelineConfig};
use findings_store::clickhouse_store::ClickHouseClient;
use findings_store::{
    ClickHouseConfig, ClickHouseFindingsStore, ColdStorage, FilesystemColdStorage,
    FindingsStore, InMemoryFindingsStore, PurgeScope,
};
use redpanda::{
    DeadLetterSink, FindingsConsumer, MemoryDeadLetterSink, RedpandaConfig,
    RedpandaDeadLetterSink,
};
use telemetry::{health, init_tracing, TracingConfig};
use worker::{
    AlertDispatcher, ArchivalWorker, IngestionProcessor, WorkerConfig, WorkerScheduler,
};

/// Hot store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum StoreBackend {
    #[default]
    Memory,
    Clickhouse,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default)]
    store: StoreBackend,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    #[serde(default)]
    redpanda: RedpandaConfig,

    #[serde(default)]
    pipeline: PipelineConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: StoreBackend::default(),
            clickhouse: ClickHouseConfig::default(),
            redpanda: RedpandaConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let root = init_tracing(TracingConfig::from_env(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    ));
    run().instrument(root).await
}

async fn run() -> Result<()> {
    // rustls 0.23+ requires explicit crypto provider selection before any TLS
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Security Findings Pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    config
        .pipeline
        .validate()
        .context("Invalid pipeline configuration")?;
    let pipeline = Arc::new(config.pipeline.clone());

    info!(
        store = ?config.store,
        table = %pipeline.table_name,
        retention_days = pipeline.retention_days.days(),
        archival = pipeline.archival_enabled(),
        streaming = config.redpanda.enabled(),
        "Loaded configuration"
    );

    let store = build_store(&config).await?;
    let cold = build_cold_storage(&pipeline).await?;
    let dead_letters = build_dead_letter_sink(&config);

    let alerts = Arc::new(
        AlertDispatcher::from_config(&pipeline).context("Failed to build alert channels")?,
    );
    let processor = Arc::new(IngestionProcessor::new(
        pipeline.clone(),
        store.clone(),
        dead_letters,
        alerts,
    ));
    let archival = Arc::new(ArchivalWorker::new(pipeline.clone(), store.clone(), cold));

    // Background workers
    let mut scheduler =
        WorkerScheduler::new(WorkerConfig::from_pipeline(&pipeline), archival.clone());
    if config.redpanda.enabled() {
        check_event_source(&config.redpanda).await;
        scheduler = scheduler.with_consumer(
            Arc::new(FindingsConsumer::new(config.redpanda.clone())),
            EventSourceAdapter::new(pipeline.min_severity),
            processor.clone(),
        );
    }
    let worker_handles = Arc::new(scheduler).start();

    let state = AppState::new(pipeline, store, processor, archival);
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");
    for handle in worker_handles {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from defaults, `config/default.toml` and `FINDINGS__*`
/// environment variables, in increasing precedence.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::with_prefix("FINDINGS")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("redpanda.brokers")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

async fn build_store(config: &Config) -> Result<Arc<dyn FindingsStore>> {
    match config.store {
        StoreBackend::Memory => {
            warn!("Using the in-memory findings store; data does not survive restarts");
            health().store.set_healthy();
            Ok(Arc::new(InMemoryFindingsStore::new()))
        }
        StoreBackend::Clickhouse => {
            let client = ClickHouseClient::new(config.clickhouse.clone())
                .context("Failed to create ClickHouse client")?;
            let ttl_scope = if config.pipeline.archival_enabled() {
                PurgeScope::ArchivedOnly
            } else {
                PurgeScope::AnyStatus
            };
            let store = ClickHouseFindingsStore::new(client, &config.pipeline.table_name)
                .context("Invalid findings table")?
                .with_ttl_scope(ttl_scope);

            // The store may come up after us; readiness tracks it
            match store.initialize().await {
                Ok(()) => health().store.set_healthy(),
                Err(e) => {
                    error!(error = %e, "ClickHouse findings store unavailable at startup");
                    health().store.set_unhealthy(e.to_string());
                }
            }
            Ok(Arc::new(store))
        }
    }
}

async fn build_cold_storage(pipeline: &PipelineConfig) -> Result<Option<Arc<dyn ColdStorage>>> {
    let Some(bucket) = pipeline
        .cold_storage_bucket
        .as_deref()
        .filter(|_| pipeline.archival_enabled())
    else {
        return Ok(None);
    };

    let cold = FilesystemColdStorage::open(bucket)
        .await
        .with_context(|| format!("Failed to open cold storage at {}", bucket))?;
    health().cold_storage.set_healthy();
    info!(root = %bucket, "Cold storage ready");
    Ok(Some(Arc::new(cold)))
}

fn build_dead_letter_sink(config: &Config) -> Arc<dyn DeadLetterSink> {
    if config.redpanda.enabled() {
        info!(topic = %config.redpanda.dead_letter_topic, "Dead-lettering to Redpanda");
        Arc::new(RedpandaDeadLetterSink::new(config.redpanda.clone()))
    } else {
        warn!("No brokers configured; dead letters are held in memory");
        Arc::new(MemoryDeadLetterSink::new())
    }
}

/// Check the event source on startup.
async fn check_event_source(config: &RedpandaConfig) {
    if redpanda::health::check_connection(config).await {
        health().event_source.set_healthy();
        info!("Redpanda connection: healthy");

        let missing = redpanda::health::missing_topics(config).await;
        if !missing.is_empty() {
            warn!(topics = ?missing, "Redpanda topics missing");
        }
    } else {
        health().event_source.set_unhealthy("Connection failed");
        error!("Redpanda connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
