use std::sync::Arc;

use bytes::Bytes;
use smallvec::SmallVec;
use transport::{PointToPoint, Rank};
use transport_bridge::{Handle, TransportBridge};
use transpose_codecs::{BeamletEntry, BlockHeader, FlagSet};

use crate::distribution::{BeamletRoute, StationLayout, Topology};
use crate::error::{TransposeError, TransposeResult};
use crate::ring::{SampleArena, SampleBlock};
use crate::tags::{data_tag, flags_tag, header_tag};

/// Data handles for one beamlet: one per posted range.
pub type BeamletHandles = SmallVec<[Handle; 2]>;

/// Everything posted to one destination for one block.
#[derive(Debug)]
pub struct DestinationTransfer {
    pub dest: Rank,
    pub header: Handle,
    /// `(global beamlet, data handles)` in header order.
    pub data: Vec<(u32, BeamletHandles)>,
    pub flags: Handle,
}

/// Receipt for one block posted by [`Sender::send_block`].
#[derive(Debug)]
pub struct BlockTransfer {
    pub from: u64,
    pub to: u64,
    pub destinations: Vec<DestinationTransfer>,
}

impl BlockTransfer {
    /// Destination ranks, ascending.
    pub fn ranks(&self) -> impl Iterator<Item = Rank> + '_ {
        self.destinations.iter().map(|d| d.dest)
    }

    pub fn beamlets_for(&self, dest: Rank) -> Vec<u32> {
        self.destination(dest)
            .map(|d| d.data.iter().map(|(beamlet, _)| *beamlet).collect())
            .unwrap_or_default()
    }

    /// Number of data transfers (1 or 2) posted for `beamlet` to `dest`.
    pub fn transfers_for(&self, dest: Rank, beamlet: u32) -> Option<usize> {
        self.destination(dest)?
            .data
            .iter()
            .find(|(b, _)| *b == beamlet)
            .map(|(_, handles)| handles.len())
    }

    /// Total handles outstanding in this receipt.
    pub fn handle_count(&self) -> usize {
        self.destinations
            .iter()
            .map(|d| 2 + d.data.iter().map(|(_, h)| h.len()).sum::<usize>())
            .sum()
    }

    /// Blocks until every transfer of the block has completed.
    pub fn wait(self) -> TransposeResult<()> {
        for destination in self.destinations {
            destination.header.wait()?;
            for (_, handles) in destination.data {
                for handle in handles {
                    handle.wait()?;
                }
            }
            destination.flags.wait()?;
        }
        Ok(())
    }

    fn destination(&self, dest: Rank) -> Option<&DestinationTransfer> {
        self.destinations.iter().find(|d| d.dest == dest)
    }
}

/// Station side of the transpose: posts one station's blocks to every
/// destination that consumes its beamlets.
///
/// A block's transfers reuse the same tags as the next block's, so callers
/// wait on a [`BlockTransfer`] before sending the following block.
pub struct Sender<T: PointToPoint> {
    bridge: Arc<TransportBridge<T>>,
    topology: Arc<Topology>,
    station: StationLayout,
    routes: Vec<(Rank, Vec<BeamletRoute>)>,
    arena: SampleArena,
}

impl<T: PointToPoint> Sender<T> {
    /// Creates the sender for the station at the bridge's rank.
    pub fn new(
        bridge: Arc<TransportBridge<T>>,
        topology: Arc<Topology>,
        arena: SampleArena,
    ) -> TransposeResult<Self> {
        let station = topology.station(bridge.rank())?.clone();
        if arena.slots() != station.slots() {
            return Err(TransposeError::invalid_block(format!(
                "arena has {} slots, {} produces {}",
                arena.slots(),
                station.rank,
                station.slots()
            )));
        }
        if arena.bytes_per_sample() != topology.bytes_per_sample {
            return Err(TransposeError::invalid_block(format!(
                "arena stores {} bytes per sample, group uses {}",
                arena.bytes_per_sample(),
                topology.bytes_per_sample
            )));
        }
        let routes = topology
            .distribution
            .destinations()
            .map(|(dest, _)| (dest, topology.distribution.routes(&station, dest)))
            .filter(|(_, routes)| !routes.is_empty())
            .collect();

        Ok(Self {
            bridge,
            topology,
            station,
            routes,
            arena,
        })
    }

    pub fn station(&self) -> &StationLayout {
        &self.station
    }

    pub fn arena(&self) -> &SampleArena {
        &self.arena
    }

    /// Destinations this station feeds, with the beamlets each receives.
    pub fn routes(&self) -> &[(Rank, Vec<BeamletRoute>)] {
        &self.routes
    }

    /// Posts header, data and flags for `block` to every destination, in
    /// ascending rank order. Returns without waiting for completion.
    pub fn send_block(
        &self,
        block: &SampleBlock,
        flags: &FlagSet,
        metadata: Bytes,
    ) -> TransposeResult<BlockTransfer> {
        block.validate(&self.arena)?;
        let limits = &self.topology.limits;
        if block.len() > limits.max_block_samples {
            return Err(TransposeError::invalid_block(format!(
                "block of {} samples exceeds the group limit of {}",
                block.len(),
                limits.max_block_samples
            )));
        }
        let flags = flags.encode(limits.max_flag_ranges)?;

        let mut destinations = Vec::with_capacity(self.routes.len());
        for (dest, routes) in &self.routes {
            let dest = *dest;
            let header = BlockHeader {
                from: block.from,
                to: block.to,
                beamlets: routes
                    .iter()
                    .map(|route| BeamletEntry::wrapped(route.slot, block.wrap_offset(route.slot)))
                    .collect(),
                metadata: metadata.clone(),
            };
            let header = self
                .bridge
                .post_send(header.encode(limits)?, dest, header_tag())?;

            let mut data = Vec::with_capacity(routes.len());
            for route in routes {
                data.push((route.beamlet, self.post_beamlet(block, route.slot, dest)?));
            }

            let flags = self.bridge.post_send(flags.clone(), dest, flags_tag())?;

            tracing::debug!(
                station = self.station.rank.0,
                dest = dest.0,
                from = block.from,
                to = block.to,
                beamlets = routes.len(),
                transfers = data.iter().map(|(_, h)| h.len()).sum::<usize>(),
                "posted block"
            );
            destinations.push(DestinationTransfer {
                dest,
                header,
                data,
                flags,
            });
        }

        Ok(BlockTransfer {
            from: block.from,
            to: block.to,
            destinations,
        })
    }

    /// Posts the 1 or 2 data transfers for the beamlet in `slot`, in time order.
    pub fn post_beamlet(
        &self,
        block: &SampleBlock,
        slot: u32,
        dest: Rank,
    ) -> TransposeResult<BeamletHandles> {
        let ranges = block
            .ranges(slot)
            .ok_or_else(|| TransposeError::invalid_block(format!("block has no slot {slot}")))?;
        let mut handles = BeamletHandles::new();
        for (index, range) in ranges.iter().enumerate() {
            let payload = self.arena.slice(range)?;
            let tag = data_tag(slot, index)?;
            handles.push(self.bridge.post_send(payload, dest, tag)?);
        }
        Ok(handles)
    }
}
