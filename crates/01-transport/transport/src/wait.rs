//! Futex-backed wait/notify shims and the one-shot completion signal.
//!
//! Native targets park on the `atomic-wait` crate (futex where available).
//! [`Completion`] layers a one-shot latch on top: exactly one party fires it,
//! any number of parties may wait for it, and waiting never consumes it.

use std::sync::atomic::{AtomicU32, Ordering};

/// Result of attempting to wait on an atomic location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The value matched and the caller was woken by a notify (or spuriously).
    Ok,
    /// The value no longer matched when the wait was attempted.
    NotEqual,
}

/// Blocks the current thread until the atomic differs from `expected` or a wakeup occurs.
#[inline]
pub fn wait_u32(atomic: &AtomicU32, expected: u32) -> WaitResult {
    if atomic.load(Ordering::Acquire) != expected {
        return WaitResult::NotEqual;
    }
    atomic_wait::wait(atomic, expected);
    WaitResult::Ok
}

/// Wakes all threads parked on `atomic`.
#[inline]
pub fn wake_all(atomic: &AtomicU32) {
    atomic_wait::wake_all(atomic as *const AtomicU32);
}

const PENDING: u32 = 0;
const FIRED: u32 = 1;

/// One-shot latch used as the per-request completion semaphore.
#[derive(Debug, Default)]
pub struct Completion {
    state: AtomicU32,
}

impl Completion {
    /// Creates an unfired latch.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(PENDING),
        }
    }

    /// Fires the latch and wakes every waiter. Returns `false` if it had already fired.
    pub fn fire(&self) -> bool {
        let previous = self.state.swap(FIRED, Ordering::AcqRel);
        wake_all(&self.state);
        previous == PENDING
    }

    /// Returns true once [`Completion::fire`] has been called.
    pub fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Parks the calling thread until the latch fires.
    pub fn wait(&self) {
        while self.state.load(Ordering::Acquire) == PENDING {
            wait_u32(&self.state, PENDING);
        }
    }
}
