//! Exponential backoff for transient cache failures

use crate::port::CacheError;
use std::time::Duration;

/// Retry schedule: `base_delay * 2^n`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 behaves like 1
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based)
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails permanently or attempts run out.
    ///
    /// Returns the last error on exhaustion.
    pub fn run<T, F>(&self, op: &'static str, mut f: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Result<T, CacheError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry + 1 < attempts => {
                    let delay = self.delay_for(retry);
                    tracing::debug!(op, attempt = retry + 1, ?delay, error = %err, "cache operation failed, retrying");
                    std::thread::sleep(delay);
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
