use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use transport::PointToPoint;

use crate::bridge::TransportBridge;
use crate::error::{BridgeError, BridgeResult};

/// Poll loop running on its own thread.
///
/// Dropping the guard stops the bridge and joins the thread. The poll loop
/// drains before it exits, so a drop blocks for as long as any outstanding
/// request lacks a peer: a send nobody receives keeps it waiting forever.
/// [`BridgeThread::shutdown_timeout`] bounds that wait.
pub struct BridgeThread<T: PointToPoint> {
    bridge: Arc<TransportBridge<T>>,
    join: Option<JoinHandle<BridgeResult<()>>>,
}

impl<T: PointToPoint> BridgeThread<T> {
    pub(crate) fn new(bridge: Arc<TransportBridge<T>>, join: JoinHandle<BridgeResult<()>>) -> Self {
        Self {
            bridge,
            join: Some(join),
        }
    }

    pub fn bridge(&self) -> &Arc<TransportBridge<T>> {
        &self.bridge
    }

    /// Stops the bridge, waits for the drain, and returns the poll loop's result.
    pub fn shutdown(mut self) -> BridgeResult<()> {
        self.bridge.stop();
        self.join_inner()
    }

    /// Like [`BridgeThread::shutdown`], but gives up once `timeout` passes with
    /// requests still outstanding. The poll thread is then detached and keeps
    /// draining on its own.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> BridgeResult<()> {
        self.bridge.stop();
        let deadline = Instant::now() + timeout;
        while self.join.as_ref().is_some_and(|join| !join.is_finished()) {
            if Instant::now() >= deadline {
                let outstanding = self.bridge.outstanding();
                self.join = None;
                tracing::warn!(
                    rank = self.bridge.rank().0,
                    outstanding,
                    "poll thread still draining; detached"
                );
                return Err(BridgeError::aborted(format!(
                    "{outstanding} requests outstanding after {timeout:?}"
                )));
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.join_inner()
    }

    fn join_inner(&mut self) -> BridgeResult<()> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| BridgeError::aborted("poll thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl<T: PointToPoint> Drop for BridgeThread<T> {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.bridge.stop();
            if let Err(err) = self.join_inner() {
                tracing::warn!(rank = self.bridge.rank().0, %err, "poll thread ended with error");
            }
        }
    }
}
