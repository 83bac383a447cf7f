//! Backoff strategies for the retry dispatcher
//!
//! Two independent policies:
//!
//! - [`JitteredBackoff`] - constant base scaled by `1 + U(0,1)`, used for rate
//!   limits. Rotation does the real work there; the wait only desynchronizes.
//! - [`ExponentialBackoff`] - bounded attempts with a delay that doubles
//!   between attempts, clamped to `[min_delay, max_delay]`. Used for transient
//!   failures.

use rand::Rng;
use std::time::Duration;

/// Jittered constant backoff: `base * (1 + uniform(0, 1))`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitteredBackoff {
    base: Duration,
}

impl JitteredBackoff {
    /// Create with the given base delay
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Base delay
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay for a given jitter factor in `[0, 1)`
    pub fn delay_with(&self, jitter: f64) -> Duration {
        self.base.mul_f64(1.0 + jitter.clamp(0.0, 1.0))
    }

    /// Next delay with a fresh random jitter
    pub fn next_delay(&self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen();
        self.delay_with(jitter)
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Attempts allowed before giving up (including the first)
    pub max_attempts: u32,

    /// Delay after the first failure
    pub min_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl ExponentialBackoff {
    /// Whether another attempt is allowed after `failures` failed attempts
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Delay to wait after the `failures`-th failure (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let scaled = self.min_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped).max(self.min_delay).min(self.max_delay)
    }
}
