// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::config::PublisherConfig;

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &PublisherConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial: cfg.initial_backoff(),
            max: cfg.max_backoff(),
        }
    }

    /// Delay before retry number `attempt + 1` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Stops delivery for `cooldown` after `threshold` consecutive transient failures.
///
/// Once the cooldown passes, the next attempt is a trial: success closes the
/// breaker, failure reopens it immediately. A zero threshold disables it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    pub fn open_until(&self) -> Option<Instant> {
        self.open_until
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.threshold > 0 && self.consecutive_failures >= self.threshold {
            if !self.is_open(now) {
                warn!(failures = self.consecutive_failures, "rhs circuit breaker open");
            }
            self.open_until = Some(now + self.cooldown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial: Duration::from_millis(200),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(200));
        assert_eq!(policy.delay(1), Duration::from_millis(400));
        assert_eq!(policy.delay(2), Duration::from_millis(800));
        assert_eq!(policy.delay(3), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_recovers() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(10));
        let now = Instant::now();

        breaker.record_failure(now);
        assert!(!breaker.is_open(now));
        breaker.record_failure(now);
        assert!(breaker.is_open(now));
        assert!(!breaker.is_open(now + Duration::from_secs(10)));

        // Failed trial reopens.
        let later = now + Duration::from_secs(11);
        breaker.record_failure(later);
        assert!(breaker.is_open(later));

        breaker.record_success();
        assert!(!breaker.is_open(later));
    }

    #[tokio::test]
    async fn test_zero_threshold_never_opens() {
        let mut breaker = CircuitBreaker::new(0, Duration::from_secs(10));
        let now = Instant::now();
        for _ in 0..100 {
            breaker.record_failure(now);
        }
        assert!(!breaker.is_open(now));
    }
}
