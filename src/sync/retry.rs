//! Deadlines and backoff for remote store calls
//!
//! Every remote call is bounded by [`with_deadline`]; transient read
//! failures are retried on the schedule described by [`RetryPolicy`].

use crate::config::RemoteConfig;
use crate::error::{StoreError, StoreResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Capped exponential backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Policy derived from remote settings
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_attempts: config.read_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Doubles from `base_delay`, never exceeds `max_delay`, and adds up to
    /// 20% jitter below the cap.
    ///
    /// # Examples
    ///
    /// ```
    /// use convsync::sync::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 3,
    ///     base_delay: Duration::from_millis(100),
    ///     max_delay: Duration::from_millis(150),
    /// };
    /// assert!(policy.delay_for(1) >= Duration::from_millis(100));
    /// assert_eq!(policy.delay_for(5), Duration::from_millis(150));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        if raw >= self.max_delay {
            return self.max_delay;
        }
        let jitter_ceiling = (raw.as_millis() as u64) / 5;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ceiling)
        };
        (raw + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

/// Run a store call, failing with [`StoreError::Timeout`] after `deadline`
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

/// Run a deadline-bounded store call, retrying transient failures
///
/// Non-transient errors and the last transient error are returned as-is.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Duration,
    mut call: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match with_deadline(deadline, call()).await {
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, error = %err, "Retrying store call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
