//! Application state shared across handlers.

use std::sync::Arc;

use findings_core::{EventSourceAdapter, PipelineConfig};
use findings_store::FindingsStore;
use worker::{ArchivalWorker, IngestionProcessor};

use crate::query::QueryService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    /// Validates and normalizes inbound payloads
    pub adapter: EventSourceAdapter,
    pub processor: Arc<IngestionProcessor>,
    pub query: QueryService,
    pub archival: Arc<ArchivalWorker>,
}

impl AppState {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn FindingsStore>,
        processor: Arc<IngestionProcessor>,
        archival: Arc<ArchivalWorker>,
    ) -> Self {
        Self {
            adapter: EventSourceAdapter::new(config.min_severity),
            query: QueryService::new(&config, store),
            config,
            processor,
            archival,
        }
    }
}
