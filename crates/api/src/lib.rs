//! HTTP API layer for the findings pipeline.

pub mod query;
pub mod response;
pub mod routes;
pub mod state;

pub use query::{FindingsPage, ListParams, QueryService, Summary};
pub use routes::router;
pub use state::AppState;
