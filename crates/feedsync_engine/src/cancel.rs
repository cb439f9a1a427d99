//! Cooperative cancellation.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag.
///
/// Cloning yields a handle to the same flag. The orchestrator checks it at
/// every phase boundary and between per-country steps, and retry backoff
/// waits on it so a cancel interrupts a sleep immediately.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every sleeper.
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.signal.notify_all();
    }

    /// Clears a previous cancellation.
    pub fn reset(&self) {
        *self.inner.cancelled.lock() = false;
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Fails with [`SyncError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps for `duration` unless cancelled first.
    pub fn sleep(&self, duration: Duration) -> SyncResult<()> {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.inner.signal.wait_for(&mut cancelled, deadline - now);
        }
        Err(SyncError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn check_reflects_flag() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());

        token.clone().cancel();
        assert!(matches!(token.check(), Err(SyncError::Cancelled)));

        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn sleep_runs_to_completion() {
        let token = CancelToken::new();
        let start = Instant::now();
        token.sleep(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_sleep() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(matches!(handle.join().unwrap(), Err(SyncError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
