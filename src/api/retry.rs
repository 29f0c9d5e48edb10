//! Transient-retry executor.
//!
//! Wraps a single remote call with a bounded number of attempts and a
//! fixed delay between them. Every failure is treated as retryable; the
//! error from the last attempt is returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::engine::pacer::Pacer;

/// Default number of attempts per remote call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts (ms).
pub const DEFAULT_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    pub async fn execute<T, E, F, Fut>(
        &self,
        pacer: &dyn Pacer,
        operation: &str,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        remaining = self.max_attempts - attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    pacer.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
