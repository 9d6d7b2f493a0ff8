//! Cooperative cancellation shared between the live loops.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

/// A cloneable stop signal.
///
/// Every loop that holds a clone observes the signal at its iteration
/// boundary. Waiting through [`StopToken::wait_timeout`] wakes up as soon as
/// the signal is raised instead of sleeping out the full interval.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<Inner>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the stop signal and wakes every waiter.
    pub fn stop(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_all();
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps up to `timeout`, returning early once stopped.
    ///
    /// Returns `true` if the token is stopped on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_stopped() {
            if self.inner.wakeup.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_stopped()
    }
}
