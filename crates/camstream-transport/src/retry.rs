//! Per-datagram retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BASE_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS};

/// How often a failed send is attempted again.
///
/// Best-effort streaming defaults to zero retries: a lost datagram is
/// superseded by the next access unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,

    /// Base delay between attempts (exponential backoff applied).
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_retries(0)
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` extra attempts with default backoff.
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }

    /// Calculate delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// Check if another attempt is allowed after `retries` retries.
    pub fn should_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy::with_retries(5);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::with_retries(2);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }
}
