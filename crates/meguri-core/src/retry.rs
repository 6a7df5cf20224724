//! Retry policies for wrapping flaky steps.

use std::time::Duration;
use thiserror::Error;

/// Retry policy for a wrapped step.
///
/// The engine never retries on its own; a policy only takes effect through
/// a retrying step wrapper.
///
/// # Examples
///
/// ```
/// use meguri_core::RetryPolicy;
/// use std::time::Duration;
///
/// // Up to 3 retries, waiting 1s, 2s, 4s (capped at 10s).
/// let policy = RetryPolicy::exponential_backoff(
///     3,
///     Duration::from_secs(1),
///     Duration::from_secs(10),
///     2,
/// )
/// .unwrap();
/// assert_eq!(policy.max_retries(), 3);
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(4)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Constant delay between attempts.
    Fixed {
        /// Maximum number of retries after the first attempt.
        max_retries: u32,
        /// Delay before each retry.
        delay: Duration,
    },
    /// Delay multiplied after each retry, up to a cap.
    ExponentialBackoff {
        /// Maximum number of retries after the first attempt.
        max_retries: u32,
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
        /// Growth factor per retry.
        multiplier: u32,
    },
}

/// Error returned when a [`RetryPolicy`] is configured inconsistently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid retry policy: {0}")]
pub struct RetryPolicyError(pub &'static str);

impl RetryPolicy {
    /// Creates a fixed-delay policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates a doubling backoff policy capped at 60 seconds.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates a backoff policy with explicit growth and cap.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Returns the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. }
            | RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Returns the delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.checked_pow(attempt).unwrap_or(u32::MAX);
                let delay = initial_delay
                    .checked_mul(factor)
                    .unwrap_or(*max_delay);
                Some(delay.min(*max_delay))
            }
        }
    }
}
