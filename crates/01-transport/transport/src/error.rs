//! Error handling helpers for the transport crate.
//!
//! The transport keeps its error surface small: addressing mistakes, receive
//! buffers too small for the matched message, and bookkeeping violations. None
//! of these are retried by higher layers.

use thiserror::Error;

use crate::ids::{Rank, RequestId};

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

/// Errors surfaced by post and poll calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer rank does not exist in this transport group.
    #[error("{rank} is outside the transport group of {size} ranks")]
    InvalidRank { rank: Rank, size: usize },

    /// A matched message did not fit into the posted receive buffer.
    #[error("message of {message} bytes truncated by a {capacity}-byte receive buffer")]
    Truncated { capacity: usize, message: usize },

    /// A poll referenced a request this endpoint never posted or already reported.
    #[error("{0} is not outstanding on this endpoint")]
    UnknownRequest(RequestId),

    /// The transport refused further work.
    #[error("transport closed: {0}")]
    Closed(&'static str),
}
