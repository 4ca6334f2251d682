use thiserror::Error;

use transport::{Direction, Rank, Tag, TransportError};

use crate::bridge::BridgeState;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Failures reported by post calls and by waited handles.
///
/// Cloneable so a single poll failure can be fanned out to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("bridge is {state:?}; requests can only be posted while running")]
    NotRunning { state: BridgeState },

    #[error("a {direction} to {peer} on {tag} is already outstanding")]
    DuplicateConversation {
        direction: Direction,
        peer: Rank,
        tag: Tag,
    },

    #[error("another thread is already running the poll loop")]
    AlreadyPolling,

    #[error("request aborted: {0}")]
    Aborted(String),
}

impl BridgeError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        BridgeError::Aborted(reason.into())
    }
}
