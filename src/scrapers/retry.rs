//! Shared retry policy for transient failures.
//!
//! One policy object parameterized by attempt cap and backoff curve,
//! reused by every tier. Retryability is decided by the error itself
//! (`AcquireError::is_retryable`), so hard failures like expired
//! credentials or detection hits are never re-attempted.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::AcquireError;

/// Exponential-backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before the given retry attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Run an operation with retries on retryable errors.
    ///
    /// The closure receives the current attempt number (starting at 1).
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AcquireError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AcquireError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
