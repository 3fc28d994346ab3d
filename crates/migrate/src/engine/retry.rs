//! Bounded exponential backoff for destination writes

use log::{debug, error, warn};
use std::time::Duration;

use crate::error::StoreError;

/// Blocking pause between attempts
///
/// Injected so tests can observe delays without sleeping.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Retry policy for a single write
///
/// One initial attempt plus up to `max_retries` retries. The delay before
/// retry `n` (0-based) is `backoff * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay after failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Total time spent sleeping when every attempt fails
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_retries).fold(Duration::ZERO, |acc, n| acc.saturating_add(self.delay_for(n)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Run `op` until it succeeds or the policy is exhausted
///
/// Every attempt is logged with its number. `Unsupported` errors are
/// returned immediately since retrying cannot help.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    what: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let total = policy.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
        match op() {
            Ok(value) => {
                debug!("{} succeeded (attempt {}/{})", what, attempt + 1, total);
                return Ok(value);
            }
            Err(e @ StoreError::Unsupported(_)) => {
                error!("{} failed: {}", what, e);
                return Err(e);
            }
            Err(e) if attempt >= policy.max_retries => {
                error!("{} failed after {} retries: {}", what, policy.max_retries, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                    what,
                    attempt + 1,
                    total,
                    e,
                    delay.as_secs_f64()
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
        }
    }
}
