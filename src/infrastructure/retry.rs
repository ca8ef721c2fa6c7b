//! Exponential backoff policy shared by registration retries and relay reconnects

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `base * factor^n` before retry `n` (zero-based),
/// with at most `max_attempts` retries after the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor: 2,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: u32, max_attempts: u32) -> Self {
        Self {
            base_delay_ms: base.as_millis() as u64,
            factor,
            max_attempts,
        }
    }

    /// Delay before retry number `retry` (zero-based), or `None` once the budget is spent
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_attempts {
            return None;
        }
        let multiplier = (self.factor.max(1) as u64).saturating_pow(retry);
        Some(Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..5).map(|n| policy.delay(n).unwrap().as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.delay(5), None);
    }

    #[test]
    fn test_zero_attempts() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), 2, 0);
        assert_eq!(policy.delay(0), None);
    }

    #[test]
    fn test_saturates_instead_of_overflowing() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 10, 100);
        assert!(policy.delay(60).is_some());
    }
}
