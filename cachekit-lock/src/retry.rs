//! # Retry Strategies
//!
//! A pluggable backoff schedule for [`crate::manager::DistributedLock`]'s
//! blocking `lock` call: each strategy is a lazy sequence of wait durations
//! between acquisition attempts, addressed by attempt number so the
//! strategy stays stateless and therefore trivially shareable across
//! concurrent callers. Grounded on harborgrid's `DistributedMutex::lock`
//! retry loop (fixed 10ms poll), generalized into a trait so callers can
//! plug exponential/linear backoff or opt out entirely.

use std::time::Duration;

use rand::Rng;

/// Produces the wait duration before the `attempt`-th retry (0-indexed:
/// `attempt == 0` is the wait after the first failed try).
pub trait RetryStrategy: Send + Sync {
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

/// Always waits the same duration between attempts.
pub struct Fixed {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Fixed {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Fixed { delay, max_attempts }
    }
}

impl RetryStrategy for Fixed {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.delay)
    }
}

/// Waits `base * multiplier^attempt`, capped at `max_delay`, with full
/// jitter applied to reduce thundering-herd retries on the same key.
pub struct Exponential {
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Exponential {
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Exponential {
            base,
            multiplier,
            max_delay,
            max_attempts,
        }
    }
}

impl RetryStrategy for Exponential {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(0.0..=capped);
        Some(Duration::from_secs_f64(jittered))
    }
}

/// Waits `base + step * attempt`, capped at `max_delay`.
pub struct Linear {
    pub base: Duration,
    pub step: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Linear {
    pub fn new(base: Duration, step: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Linear {
            base,
            step,
            max_delay,
            max_attempts,
        }
    }
}

impl RetryStrategy for Linear {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let scaled = self.base + self.step * attempt;
        Some(scaled.min(self.max_delay))
    }
}

/// Never retries: a single acquisition attempt only.
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_stops_after_max_attempts() {
        let strategy = Fixed::new(Duration::from_millis(10), 3);
        assert_eq!(strategy.delay(0), Some(Duration::from_millis(10)));
        assert_eq!(strategy.delay(2), Some(Duration::from_millis(10)));
        assert_eq!(strategy.delay(3), None);
    }

    #[test]
    fn exponential_is_capped_and_bounded() {
        let strategy = Exponential::new(Duration::from_millis(10), 2.0, Duration::from_millis(100), 10);
        for attempt in 0..10 {
            let delay = strategy.delay(attempt).unwrap();
            assert!(delay <= Duration::from_millis(100));
        }
        assert_eq!(strategy.delay(10), None);
    }

    #[test]
    fn linear_grows_by_fixed_step() {
        let strategy = Linear::new(Duration::from_millis(10), Duration::from_millis(5), Duration::from_millis(100), 5);
        assert_eq!(strategy.delay(0), Some(Duration::from_millis(10)));
        assert_eq!(strategy.delay(1), Some(Duration::from_millis(15)));
        assert_eq!(strategy.delay(4), None);
    }

    #[test]
    fn no_retry_never_waits() {
        let strategy = NoRetry;
        assert_eq!(strategy.delay(0), None);
    }
}
