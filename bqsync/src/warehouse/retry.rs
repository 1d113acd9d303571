use std::future::Future;
use std::time::Duration;

use config::shared::RetryConfig;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::error::SyncResult;

/// Bounded exponential backoff with full jitter for warehouse operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that tries each operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound of the delay before retry number `attempt + 1`.
    ///
    /// `initial * 2^attempt`, with the exponent clamped at 10 and the result capped at the
    /// maximum backoff.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_backoff.as_millis() as u64;
        let max_ms = self.max_backoff.as_millis() as u64;

        Duration::from_millis(
            initial_ms
                .saturating_mul(1u64 << attempt.min(10))
                .min(max_ms),
        )
    }

    /// Delay drawn uniformly between zero and [`RetryPolicy::backoff_ceiling`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=ceiling);

        Duration::from_millis(jitter)
    }

    /// Runs `f` until it succeeds, fails with a non retryable error, or attempts run out.
    ///
    /// The error of the last attempt is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, table: &str, mut f: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        table,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "warehouse operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(
                            operation,
                            table,
                            attempts = attempt + 1,
                            "warehouse operation exhausted its retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
