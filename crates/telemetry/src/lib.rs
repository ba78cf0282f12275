//! Telemetry for the findings pipeline: structured logging setup,
//! process-global metrics and component health.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
