//! Retry with exponential backoff and jitter for record-service calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{CacheError, RecordError};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How upstream calls are attempted.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Per-attempt deadline.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            attempt_timeout,
        }
    }

    fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Sleep before attempt `attempt + 1`, given `attempt` (1-based) just failed.
    ///
    /// `base * 2^(attempt-1)` plus up to 25% random jitter, capped at 30s.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp).min(MAX_BACKOFF);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        delay.mul_f64(1.0 + jitter).min(MAX_BACKOFF)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `key` only labels logs and the returned error.
    pub async fn run<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T, CacheError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RecordError>>,
    {
        let max = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(RecordError::Timeout(self.attempt_timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(key, attempt, "Record service recovered");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::error!(key, attempt, error = %err, "Record service rejected request");
                return Err(CacheError::Rejected {
                    key: key.to_string(),
                    reason: err.to_string(),
                });
            }

            if attempt >= max {
                tracing::error!(key, attempts = attempt, error = %err, "All record service attempts failed");
                return Err(CacheError::Upstream {
                    key: key.to_string(),
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }

            let delay = self.backoff(attempt);
            tracing::warn!(
                key,
                attempt,
                error = %err,
                "Record service attempt failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
