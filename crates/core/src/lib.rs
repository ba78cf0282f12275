//! Core types, validation and configuration for the security findings pipeline.

pub mod config;
pub mod envelope;
pub mod error;
pub mod finding;
pub mod limits;
pub mod retention;

pub use config::*;
pub use envelope::*;
pub use error::{Error, Result};
pub use finding::*;
pub use retention::*;
