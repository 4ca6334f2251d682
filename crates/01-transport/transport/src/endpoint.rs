use bytes::{Bytes, BytesMut};

use crate::error::TransportResult;
use crate::ids::{Rank, RequestId, Tag};

/// Result of a request the transport reported as complete.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The outbound payload was handed to its matching receive.
    Sent,
    /// The posted buffer, truncated to the received message length.
    Received(BytesMut),
}

/// Non-blocking point-to-point transport.
///
/// Implementations only ever need to be driven from one thread at a time, so
/// they are required to be `Send` (the owner may move between threads) but are
/// expected not to be `Sync`. Buffers move into the transport on post and come
/// back through [`Outcome::Received`] on completion, which keeps them owned by
/// exactly one side for the lifetime of the request.
pub trait PointToPoint: Send {
    /// Rank of the local endpoint.
    fn rank(&self) -> Rank;

    /// Number of ranks in the transport group.
    fn size(&self) -> usize;

    /// Posts an outbound transfer of `payload` to `dest` under `tag`.
    fn post_send(&mut self, payload: Bytes, dest: Rank, tag: Tag) -> TransportResult<RequestId>;

    /// Posts an inbound transfer from `src` under `tag` into `buffer`.
    ///
    /// `buffer.len()` is the largest message the receive accepts.
    fn post_receive(&mut self, buffer: BytesMut, src: Rank, tag: Tag)
        -> TransportResult<RequestId>;

    /// Tests `ids` without blocking and appends every newly completed request to
    /// `completed`. Each id is reported at most once.
    fn test_some(
        &mut self,
        ids: &[RequestId],
        completed: &mut Vec<(RequestId, TransportResult<Outcome>)>,
    ) -> TransportResult<()>;
}
