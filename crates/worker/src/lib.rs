//! Background workers for the findings pipeline.
//!
//! Handles async workflows:
//! - Ingestion (stamp, upsert, retry, dead-letter)
//! - Alerts (tiered dispatch with per-channel retry)
//! - Consumer (Redpanda → findings store)
//! - Archival (hot → cold, TTL reaper, cold lifecycle)

pub mod alerts;
pub mod archival;
pub mod consumer;
pub mod ingest;
pub mod retry;
pub mod scheduler;

pub use alerts::*;
pub use archival::*;
pub use consumer::*;
pub use ingest::*;
pub use retry::{Exhausted, RetryPolicy};
pub use scheduler::*;
