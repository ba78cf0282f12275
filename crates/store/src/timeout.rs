//! Bounded external calls.

use std::future::Future;
use std::time::Duration;

use findings_core::{Error, Result};
use tracing::warn;

/// Run `fut` with an upper bound on its duration.
///
/// An elapsed timeout becomes [`Error::Timeout`], which callers treat as a
/// transient failure under their own retry policy.
pub async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(operation, timeout_ms, "External call timed out");
            Err(Error::timeout(operation, timeout_ms))
        }
    }
}
