//! Bounded exponential backoff for search requests

use std::time::Duration;

/// Exponential backoff with a random factor in [1, 2)
///
/// The wait for retry `n` is `factor * initial * 2^n`. Once that reaches
/// `max` the backoff gives up instead of waiting at the cap.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Wait before retry number `retry` (0-based), `None` to stop
    pub fn next(&self, retry: u32) -> Option<Duration> {
        self.next_with_factor(retry, 1.0 + rand::random::<f64>())
    }

    fn next_with_factor(&self, retry: u32, factor: f64) -> Option<Duration> {
        let max_us = self.max.as_micros() as f64;
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let wait_us = (factor * self.initial.as_micros() as f64 * 2f64.powi(exponent)).min(max_us);

        if wait_us >= max_us {
            return None;
        }
        Some(Duration::from_micros(wait_us.round() as u64))
    }
}

/// Retry policy applied to transient search failures
#[derive(Debug, Clone, Copy)]
pub struct Retrier {
    backoff: ExponentialBackoff,
    max_retries: u32,
}

impl Default for Retrier {
    fn default() -> Self {
        Self {
            backoff: ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(8)),
            max_retries: 5,
        }
    }
}

impl Retrier {
    pub fn new(backoff: ExponentialBackoff, max_retries: u32) -> Self {
        Self {
            backoff,
            max_retries,
        }
    }

    /// Disable retries entirely
    pub fn none() -> Self {
        Self::new(
            ExponentialBackoff::new(Duration::ZERO, Duration::ZERO),
            0,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// How long to wait before retry `retry`, or `None` when out of attempts
    pub fn next_wait(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        self.backoff.next(retry)
    }
}
