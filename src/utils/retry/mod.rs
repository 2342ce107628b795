//! Redelivery policy with exponential backoff.
//!
//! Decides whether a failed message goes back through the delay queue or is
//! shunted to the dead-letter queue, and how long the delay is.

use std::time::Duration;

/// Largest per-message expiration RabbitMQ accepts (2^32 - 1 ms).
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(u32::MAX as u64);

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed before a message is dead-lettered (0 = dead-letter on first failure).
    pub max_retries: u32,
    /// Delay before the first retry; doubles with every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

/// What to do with a message that failed processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish to the retry queue with the incremented count and delay.
    Retry {
        next_retry_count: u32,
        delay: Duration,
    },
    /// Retry budget exhausted.
    DeadLetter,
}

impl RetryPolicy {
    /// Delay for a message that has already been retried `retry_count` times.
    ///
    /// Uses exponential backoff: delay = base * 2^retry_count, capped at
    /// [`MAX_RETRY_DELAY`].
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
    }

    /// Check if another retry attempt should be made.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Decide the fate of a message that carried `retry_count` on failure.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if !self.should_retry(retry_count) {
            return RetryDecision::DeadLetter;
        }
        RetryDecision::Retry {
            next_retry_count: retry_count.saturating_add(1),
            delay: self.delay_for_attempt(retry_count),
        }
    }
}
