//! In-process point-to-point fabric.
//!
//! Every rank of a [`LoopbackFabric`] gets one [`LoopbackEndpoint`]. Endpoints
//! share a matching table guarded by a single lock that plays the role of the
//! network:
//!
//! ```text
//!  (src, dst, tag) ─► Channel { sends: [id, payload]…, receives: [id, buffer]… }
//!                        │ oldest send ⨯ oldest receive
//!                        ▼
//!  completed[src] += (send id, Sent)      completed[dst] += (recv id, Received)
//! ```
//!
//! Sends complete when matched (rendezvous), so a send whose receive is never
//! posted stays outstanding. Per (src, dst, tag) triple, matching is FIFO in post
//! order on both sides.

use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::endpoint::{Outcome, PointToPoint};
use crate::error::{TransportError, TransportResult};
use crate::ids::{Rank, RequestId, Tag};

type ChannelKey = (Rank, Rank, Tag);

#[derive(Default)]
struct Channel {
    sends: VecDeque<(RequestId, Bytes)>,
    receives: VecDeque<(RequestId, BytesMut)>,
}

impl Channel {
    fn is_idle(&self) -> bool {
        self.sends.is_empty() && self.receives.is_empty()
    }
}

struct Wire {
    size: usize,
    next_id: u64,
    channels: HashMap<ChannelKey, Channel>,
    outstanding: Vec<HashSet<RequestId>>,
    completed: Vec<HashMap<RequestId, TransportResult<Outcome>>>,
}

impl Wire {
    fn new(size: usize) -> Self {
        Self {
            size,
            next_id: 0,
            channels: HashMap::new(),
            outstanding: (0..size).map(|_| HashSet::new()).collect(),
            completed: (0..size).map(|_| HashMap::new()).collect(),
        }
    }

    fn check_rank(&self, rank: Rank) -> TransportResult<()> {
        if rank.index() >= self.size {
            return Err(TransportError::InvalidRank {
                rank,
                size: self.size,
            });
        }
        Ok(())
    }

    fn allocate(&mut self, owner: Rank) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.outstanding[owner.index()].insert(id);
        id
    }

    fn match_channel(&mut self, key: ChannelKey) {
        let (src, dst, _) = key;
        let Some(channel) = self.channels.get_mut(&key) else {
            return;
        };

        let mut matched = Vec::new();
        while !channel.sends.is_empty() && !channel.receives.is_empty() {
            let (Some((send_id, payload)), Some((recv_id, buffer))) =
                (channel.sends.pop_front(), channel.receives.pop_front())
            else {
                break;
            };
            matched.push((send_id, payload, recv_id, buffer));
        }
        if channel.is_idle() {
            self.channels.remove(&key);
        }

        for (send_id, payload, recv_id, mut buffer) in matched {
            let received = if payload.len() > buffer.len() {
                Err(TransportError::Truncated {
                    capacity: buffer.len(),
                    message: payload.len(),
                })
            } else {
                buffer.truncate(payload.len());
                buffer.copy_from_slice(&payload);
                Ok(Outcome::Received(buffer))
            };
            tracing::trace!(%src, %dst, tag = %key.2, bytes = payload.len(), "loopback match");
            self.completed[src.index()].insert(send_id, Ok(Outcome::Sent));
            self.completed[dst.index()].insert(recv_id, received);
        }
    }
}

/// Shared matching table for a group of in-process ranks.
#[derive(Clone)]
pub struct LoopbackFabric {
    wire: Arc<Mutex<Wire>>,
}

impl LoopbackFabric {
    /// Creates a fabric for `size` ranks.
    pub fn new(size: usize) -> Self {
        Self {
            wire: Arc::new(Mutex::new(Wire::new(size))),
        }
    }

    /// Number of ranks in the group.
    pub fn size(&self) -> usize {
        self.wire.lock().size
    }

    /// Returns the endpoint for `rank`.
    ///
    /// Taking the same rank twice yields two endpoints that share a mailbox; callers
    /// keep one endpoint per rank.
    pub fn endpoint(&self, rank: Rank) -> TransportResult<LoopbackEndpoint> {
        self.wire.lock().check_rank(rank)?;
        Ok(LoopbackEndpoint {
            rank,
            wire: Arc::clone(&self.wire),
            _single_thread: PhantomData,
        })
    }

    /// Returns one endpoint per rank, in rank order.
    pub fn endpoints(&self) -> Vec<LoopbackEndpoint> {
        (0..self.size() as u32)
            .map(|rank| LoopbackEndpoint {
                rank: Rank(rank),
                wire: Arc::clone(&self.wire),
                _single_thread: PhantomData,
            })
            .collect()
    }

    /// Number of posted requests not yet matched, across all ranks.
    pub fn unmatched(&self) -> usize {
        let wire = self.wire.lock();
        wire.channels
            .values()
            .map(|channel| channel.sends.len() + channel.receives.len())
            .sum()
    }
}

/// One rank's view of a [`LoopbackFabric`].
///
/// `Send` so it can be handed to the thread that owns it, never `Sync`.
pub struct LoopbackEndpoint {
    rank: Rank,
    wire: Arc<Mutex<Wire>>,
    _single_thread: PhantomData<Cell<()>>,
}

impl PointToPoint for LoopbackEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.wire.lock().size
    }

    fn post_send(&mut self, payload: Bytes, dest: Rank, tag: Tag) -> TransportResult<RequestId> {
        let mut wire = self.wire.lock();
        wire.check_rank(dest)?;
        let id = wire.allocate(self.rank);
        let key = (self.rank, dest, tag);
        wire.channels
            .entry(key)
            .or_default()
            .sends
            .push_back((id, payload));
        wire.match_channel(key);
        Ok(id)
    }

    fn post_receive(
        &mut self,
        buffer: BytesMut,
        src: Rank,
        tag: Tag,
    ) -> TransportResult<RequestId> {
        let mut wire = self.wire.lock();
        wire.check_rank(src)?;
        let id = wire.allocate(self.rank);
        let key = (src, self.rank, tag);
        wire.channels
            .entry(key)
            .or_default()
            .receives
            .push_back((id, buffer));
        wire.match_channel(key);
        Ok(id)
    }

    fn test_some(
        &mut self,
        ids: &[RequestId],
        completed: &mut Vec<(RequestId, TransportResult<Outcome>)>,
    ) -> TransportResult<()> {
        let mut wire = self.wire.lock();
        let me = self.rank.index();
        for id in ids {
            if !wire.outstanding[me].contains(id) {
                return Err(TransportError::UnknownRequest(*id));
            }
        }
        for id in ids {
            if let Some(result) = wire.completed[me].remove(id) {
                wire.outstanding[me].remove(id);
                completed.push((*id, result));
            }
        }
        Ok(())
    }
}
