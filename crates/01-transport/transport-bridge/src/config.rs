use std::time::Duration;

/// Poll loop tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Largest number of outstanding requests handed to one `test_some` call.
    pub poll_batch: usize,
    /// Upper bound on one sleep while no request is outstanding.
    pub idle_wait: Duration,
    /// Pause after a poll that completed nothing. Zero yields instead.
    pub idle_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_batch: 64,
            idle_wait: Duration::from_millis(100),
            idle_backoff: Duration::from_micros(50),
        }
    }
}

impl BridgeConfig {
    pub(crate) fn batch(&self) -> usize {
        self.poll_batch.max(1)
    }
}
