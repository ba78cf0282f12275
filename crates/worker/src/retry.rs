//! Bounded exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use findings_core::{Error, RetrySettings};

/// Retry policy owned by the ingestion processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

/// The last error once a policy gave up.
#[derive(Debug)]
pub struct Exhausted {
    pub error: Error,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: multiplier.max(1),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.multiplier,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the attempts are spent. `call` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = findings_core::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() || attempt >= self.max_attempts => {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}
