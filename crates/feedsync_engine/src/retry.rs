//! Exponential backoff for transient collaborator failures.

use crate::cancel::CancelToken;
use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behaviour for collaborator calls.
///
/// Retry `n` (1-based) waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`, plus up to 25% jitter when enabled. Only errors for which
/// [`SyncError::is_retryable`] holds are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay, before jitter.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with the default delay cap and jitter on.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disables jitter, making delays deterministic.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry `retry` (1-based). Zero for `retry == 0`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let jitter: f64 = rand::thread_rng().gen_range(0.0..0.25);
            delay + delay.mul_f64(jitter)
        } else {
            delay
        }
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of
    /// retries.
    ///
    /// `op` receives the 1-based attempt number. Non-retryable errors are
    /// returned as-is; a retryable error on the last attempt becomes
    /// [`SyncError::RetryExhausted`]. Backoff sleeps end early with
    /// [`SyncError::Cancelled`] when `cancel` fires.
    pub fn execute<T, F>(&self, label: &str, cancel: &CancelToken, mut op: F) -> SyncResult<T>
    where
        F: FnMut(u32) -> SyncResult<T>,
    {
        let attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            cancel.check()?;
            let error = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= attempts {
                warn!("{label}: giving up after {attempt} attempts: {error}");
                return Err(SyncError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.delay_for_retry(attempt);
            warn!(
                "{label}: attempt {attempt}/{attempts} failed ({error}); retrying in {}ms",
                delay.as_millis()
            );
            cancel.sleep(delay)?;
            debug!("{label}: retry {attempt} starting");
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
