//! Bounded retry with backoff for retryable kernel errors.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Retry configuration for operations that can lose transient races
/// (conditional mutations, transient store failures).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Linearly growing backoff of `base · attempt` starting at 10 ms
    /// (10 ms, 20 ms, 30 ms, …), for `max_attempts` tries.
    #[must_use]
    pub fn linear(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(10),
        }
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Override the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Number of attempts before giving up.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given 1-based retry attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3)
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy
/// is exhausted. Only [`Error::is_retryable`] errors are retried; the last
/// error is surfaced unchanged after exhaustion.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<Error> = None;
    for attempt in 1..=policy.max_attempts() {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts() => {
                tracing::debug!(attempt, error = %err, "retrying after transient failure");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    // Unreachable unless max_attempts is 0, which the constructor forbids.
    Err(last_err.unwrap_or_else(|| Error::Other(anyhow::anyhow!("retry loop exhausted"))))
}
