use std::sync::atomic::{AtomicU64, Ordering};

use transport::Direction;

#[derive(Default)]
pub(crate) struct BridgeMetrics {
    sends_posted: AtomicU64,
    receives_posted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    polls: AtomicU64,
    idle_polls: AtomicU64,
}

impl BridgeMetrics {
    pub(crate) fn record_post(&self, direction: Direction) {
        let counter = match direction {
            Direction::Send => &self.sends_posted,
            Direction::Receive => &self.receives_posted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll(&self, completed: usize, failed: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if completed == 0 {
            self.idle_polls.fetch_add(1, Ordering::Relaxed);
        }
        self.completed
            .fetch_add((completed - failed) as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BridgeMetricsSnapshot {
        BridgeMetricsSnapshot {
            sends_posted: self.sends_posted.load(Ordering::Relaxed),
            receives_posted: self.receives_posted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the bridge counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeMetricsSnapshot {
    pub sends_posted: u64,
    pub receives_posted: u64,
    /// Requests that completed successfully.
    pub completed: u64,
    /// Requests the transport reported as failed.
    pub failed: u64,
    pub polls: u64,
    /// Polls that completed no request.
    pub idle_polls: u64,
}
