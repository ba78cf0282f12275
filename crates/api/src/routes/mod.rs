//! API routes.

pub mod archival;
pub mod findings;
pub mod health;
pub mod ingest;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(ingest::ingest_handler))
        .route("/findings", get(findings::list_handler))
        .route("/findings/summary", get(findings::summary_handler))
        .route("/findings/:id", get(findings::get_handler))
        .route("/archival/sweep", post(archival::sweep_handler))
        .route("/archival/status", get(archival::status_handler))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}
