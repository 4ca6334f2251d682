use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use transport::wait::Completion;
use transport::{Direction, Outcome, Rank, RequestId, Tag};

use crate::bridge::ConversationKey;
use crate::error::{BridgeError, BridgeResult};

/// Result of a successfully completed request.
#[derive(Debug, PartialEq, Eq)]
pub enum Completed {
    Sent,
    /// Receive buffer truncated to the delivered message.
    Received(BytesMut),
}

impl Completed {
    /// Returns the received buffer, or `None` for a completed send.
    pub fn into_buffer(self) -> Option<BytesMut> {
        match self {
            Completed::Sent => None,
            Completed::Received(buffer) => Some(buffer),
        }
    }
}

impl From<Outcome> for Completed {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Sent => Completed::Sent,
            Outcome::Received(buffer) => Completed::Received(buffer),
        }
    }
}

/// Completion slot shared between the request table and the caller's handle.
pub(crate) struct PendingRequest {
    signal: Completion,
    result: Mutex<Option<BridgeResult<Completed>>>,
}

impl PendingRequest {
    pub(crate) fn new() -> Self {
        Self {
            signal: Completion::new(),
            result: Mutex::new(None),
        }
    }

    /// Stores the result and fires the signal. Later calls are ignored.
    pub(crate) fn complete(&self, result: BridgeResult<Completed>) {
        {
            let mut slot = self.result.lock();
            if slot.is_some() || self.signal.is_fired() {
                return;
            }
            *slot = Some(result);
        }
        self.signal.fire();
    }
}

/// Caller-side token for one posted request.
///
/// Waiting consumes the handle, so each request is waited on at most once.
/// Dropping a handle without waiting is allowed; the request still runs to
/// completion and its result is discarded.
pub struct Handle {
    id: RequestId,
    key: ConversationKey,
    request: Arc<PendingRequest>,
}

impl Handle {
    pub(crate) fn new(id: RequestId, key: ConversationKey, request: Arc<PendingRequest>) -> Self {
        Self { id, key, request }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.key.direction
    }

    pub fn peer(&self) -> Rank {
        self.key.peer
    }

    pub fn tag(&self) -> Tag {
        self.key.tag
    }

    /// Returns true once the poll loop has signalled this request.
    pub fn is_complete(&self) -> bool {
        self.request.signal.is_fired()
    }

    /// Blocks until the request completes and returns its result.
    pub fn wait(self) -> BridgeResult<Completed> {
        self.request.signal.wait();
        self.request
            .result
            .lock()
            .take()
            .unwrap_or_else(|| Err(BridgeError::aborted("completion fired without a result")))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("direction", &self.key.direction)
            .field("peer", &self.key.peer)
            .field("tag", &self.key.tag)
            .field("complete", &self.is_complete())
            .finish()
    }
}
