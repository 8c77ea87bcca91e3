//! Exponential backoff for reconnect attempts, with random jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Stateless backoff policy: computes the delay before a given attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl From<&ReconnectConfig> for RetryPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before the `attempt`-th reconnect (1-based), or
    /// `None` once `max_attempts` is exceeded.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || !self.should_retry(attempt) {
            return None;
        }
        let base_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.max_backoff.as_millis() as f64);

        let jitter = if self.jitter_fraction > 0.0 {
            let spread = capped * self.jitter_fraction;
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Some(Duration::from_millis((capped + jitter).max(0.0) as u64))
    }

    /// Returns `true` if `attempt` is within the budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, jitter_fraction: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            multiplier: 2.0,
            jitter_fraction,
        }
    }

    #[test]
    fn delays_double_until_capped() {
        let p = policy(6, 0.0);
        let delays: Vec<u128> = (1..=6).map(|n| p.next_delay(n).unwrap().as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 800, 1_000, 1_000]);
        assert!(p.next_delay(7).is_none());
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let p = policy(3, 0.5);
        for _ in 0..100 {
            let d = p.next_delay(2).unwrap().as_millis();
            assert!((100..=300).contains(&d), "delay {d}ms outside jitter window");
        }
    }

    #[test]
    fn zero_attempt_budget_never_retries() {
        let p = policy(0, 0.0);
        assert!(!p.should_retry(1));
        assert!(p.next_delay(1).is_none());
    }
}
