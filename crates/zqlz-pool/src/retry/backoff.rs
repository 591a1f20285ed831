//! Linear backoff retry policy
//!
//! Delays grow by a fixed step per attempt:
//! `delay(n) = retry_delay + n * extra_delay`, where `n` is the zero-based
//! retry number. The number of attempts is bounded, so the total time spent
//! retrying is bounded too.

use std::future::Future;
use std::time::Duration;

use crate::pool::PoolOptions;

/// Retry policy used for raw connection creation and closing.
///
/// # Example
///
/// ```
/// use zqlz_pool::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_millis(500));
///
/// assert_eq!(policy.calculate_delay(0), Duration::from_millis(500));
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    max_attempts: u32,
    /// Delay before the first retry
    retry_delay: Duration,
    /// Added on top of `retry_delay` for every further retry
    extra_delay: Duration,
}

impl RetryPolicy {
    /// Create a new policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, retry_delay: Duration, extra_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            extra_delay,
        }
    }

    /// A policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Derive the policy from pool options.
    ///
    /// When `should_retry` is off the operation is attempted once.
    pub fn from_options(options: &PoolOptions) -> Self {
        if options.should_retry() {
            Self::new(
                options.max_retry(),
                options.retry_delay(),
                options.extra_delay(),
            )
        } else {
            Self::no_retry()
        }
    }

    /// Delay to wait before retry number `attempt` (zero based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_add(self.extra_delay.saturating_mul(attempt))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    ///
    /// Only the final outcome is reported: the first success, or the error of
    /// the last attempt.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.calculate_delay(attempt - 1);
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Default policy: 3 attempts, 500ms base delay, 500ms extra per retry
    fn default() -> Self {
        Self::from_options(&PoolOptions::default())
    }
}
