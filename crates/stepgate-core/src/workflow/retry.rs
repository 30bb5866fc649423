//! Fixed-delay retry policy for workflow steps.
//!
//! Stateless: the number of failed attempts lives on the step itself
//! (`Step::retry_count`) so that it survives in the store.

use std::time::Duration;

use stepgate_types::config::EngineConfig;

/// Retry policy applied uniformly to automated and approval steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per step, the first one included.
    pub max_attempts: u32,
    /// Pause between consecutive attempts of the same step.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Attempts left after `failed_attempts` failures.
    pub fn remaining(&self, failed_attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(failed_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_within_limit() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_default_is_three_attempts_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
        assert_eq!(policy.remaining(1), 2);
    }
}
