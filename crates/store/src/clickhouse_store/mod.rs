//! ClickHouse-backed findings store.

pub mod client;
pub mod config;
pub mod health;
pub mod schema;
pub mod store;

pub use client::ClickHouseClient;
pub use config::ClickHouseConfig;
pub use store::{ClickHouseFindingsStore, FindingRow};
