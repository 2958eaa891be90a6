//! Bounded retry with exponential backoff for external calls.
//!
//! Only [`Error::Transient`] and [`Error::Throttled`] are retried. Everything
//! else (not found, oracle rate limits, malformed payloads) goes straight back
//! to the caller so the distinction between "skip this" and "back off" is
//! never blurred.

use crate::error::{Error, Result};
use log::{debug, warn};
use std::time::Duration;

/// Retry policy shared by every HTTP collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further attempt
    pub base_delay: Duration,
    /// Upper bound on any single sleep
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps. Used by tests and dry runs.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` starts at 1.
    #[must_use]
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self.base_delay.saturating_mul(1 << exponent);
        let wanted = retry_after.map_or(computed, |hint| hint.max(computed));
        wanted.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `label` only shows up in logs.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let hint = match &err {
                        Error::Throttled { retry_after, .. } => *retry_after,
                        _ => None,
                    };
                    let delay = self.backoff(attempt, hint);
                    warn!("{label}: attempt {attempt}/{attempts} failed ({err}), retrying in {delay:?}");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    debug!("{label}: giving up after {attempt} attempt(s): {err}");
                    return Err(err);
                }
            }
        }
    }
}
