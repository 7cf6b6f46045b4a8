//! Retry with exponential backoff
//!
//! Used for bounded hardware probing at startup and for reconnecting the
//! transcript source.

use std::time::Duration;

use rand::Rng;

use crate::Result;

/// Retry policy for fallible startup and reconnect operations
///
/// Controls how many times a failed operation is retried and how
/// long to wait between attempts using exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy allowing `attempts` total tries
    #[must_use]
    pub fn attempts(attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: attempts.saturating_sub(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Total number of tries this policy allows
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Compute the delay before the next retry attempt.
///
/// Exponential backoff: `min(base_delay * 2^attempt + jitter, max_delay)`,
/// with jitter of 0-25% of the computed delay.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let base = base.min(policy.max_delay);

    let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..=0.25));

    (base + jitter).min(policy.max_delay)
}

/// Run `op` until it succeeds or the policy is exhausted
///
/// `op` receives the zero-based attempt number. The last error is returned.
///
/// # Errors
///
/// Returns the error of the final attempt
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                let delay = delay_for_attempt(policy, attempt);
                tracing::debug!(what, attempt, error = %e, ?delay, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::debug!(what, attempts = attempt + 1, error = %e, "giving up");
                return Err(e);
            }
        }
    }
}
