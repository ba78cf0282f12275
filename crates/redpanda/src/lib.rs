//! Redpanda transport for the findings pipeline: the inbound findings topic
//! consumer and the dead-letter sink for findings that exhausted retries.

pub mod config;
pub mod connection;
pub mod consumer;
pub mod dead_letter;
pub mod health;

pub use config::*;
pub use consumer::*;
pub use dead_letter::*;
