use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use bytes::{Bytes, BytesMut};
use smallvec::smallvec;
use transport::{PointToPoint, Rank};
use transport_bridge::{BridgeError, TransportBridge};
use transpose_codecs::{BeamletEntry, BlockHeader, FlagSet};

use crate::distribution::{BeamletRoute, Topology};
use crate::error::{ConfigError, ProtocolError, TransposeError, TransposeResult};
use crate::sender::BeamletHandles;
use crate::tags::{data_tag, flags_tag, header_tag};

/// Progress of one station's contribution to the block being assembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StationPhase {
    WaitHeader,
    WaitData,
    WaitFlags,
    StationDone,
}

/// One station's samples for one beamlet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationSamples {
    pub station: Rank,
    /// `block_len * bytes_per_sample` contiguous bytes in time order.
    pub samples: Bytes,
}

/// What a station attached to its block besides samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationContribution {
    pub station: Rank,
    pub flags: FlagSet,
    pub metadata: Bytes,
}

/// A block complete from every contributing station.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembledBlock {
    pub from: u64,
    pub to: u64,
    /// Global beamlet → per-station samples, stations in configuration order.
    pub beamlets: BTreeMap<u32, Vec<StationSamples>>,
    /// Union of every station's flags.
    pub flags: FlagSet,
    pub stations: Vec<StationContribution>,
}

impl AssembledBlock {
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn samples(&self, beamlet: u32, station: Rank) -> Option<&Bytes> {
        self.beamlets
            .get(&beamlet)?
            .iter()
            .find(|s| s.station == station)
            .map(|s| &s.samples)
    }

    pub fn station_flags(&self, station: Rank) -> Option<&FlagSet> {
        self.stations
            .iter()
            .find(|s| s.station == station)
            .map(|s| &s.flags)
    }
}

struct StationPlan {
    station: Rank,
    routes: Vec<BeamletRoute>,
}

struct StationBlock {
    station: Rank,
    from: u64,
    to: u64,
    beamlets: Vec<(u32, Bytes)>,
    flags: FlagSet,
    metadata: Bytes,
}

/// Destination side of the transpose: gathers one block at a time from every
/// station that feeds this rank.
pub struct Receiver<T: PointToPoint> {
    bridge: Arc<TransportBridge<T>>,
    topology: Arc<Topology>,
    plans: Vec<StationPlan>,
}

impl<T: PointToPoint> Receiver<T> {
    /// Creates the receiver for the destination at the bridge's rank.
    pub fn new(bridge: Arc<TransportBridge<T>>, topology: Arc<Topology>) -> TransposeResult<Self> {
        let rank = bridge.rank();
        let plans: Vec<StationPlan> = topology
            .contributors(rank)
            .into_iter()
            .map(|(station, routes)| StationPlan {
                station: station.rank,
                routes,
            })
            .collect();
        if plans.is_empty() {
            return Err(ConfigError::UnknownDestination(rank).into());
        }
        Ok(Self {
            bridge,
            topology,
            plans,
        })
    }

    /// Contributing stations, in configuration order.
    pub fn stations(&self) -> impl Iterator<Item = Rank> + '_ {
        self.plans.iter().map(|p| p.station)
    }

    /// Beamlets this rank consumes.
    pub fn beamlets(&self) -> &[u32] {
        self.topology.distribution.beamlets_for(self.bridge.rank())
    }

    /// Receives the next block from every station in parallel and assembles it.
    pub fn receive_block(&self) -> TransposeResult<AssembledBlock> {
        let results: Vec<TransposeResult<StationBlock>> = thread::scope(|scope| {
            let workers: Vec<_> = self
                .plans
                .iter()
                .map(|plan| scope.spawn(move || self.receive_station(plan)))
                .collect();
            workers
                .into_iter()
                .map(|worker| {
                    worker
                        .join()
                        .unwrap_or_else(|_| Err(TransposeError::WorkerPanicked))
                })
                .collect()
        });

        let stations = results.into_iter().collect::<TransposeResult<Vec<_>>>()?;
        self.assemble(stations)
    }

    /// Assembles `blocks` blocks and hands each to `sink`. Stops early, without
    /// error, if the consumer hangs up. Returns the number delivered.
    pub fn run(
        &self,
        blocks: usize,
        sink: &crossbeam_channel::Sender<AssembledBlock>,
    ) -> TransposeResult<usize> {
        for delivered in 0..blocks {
            let block = self.receive_block()?;
            if sink.send(block).is_err() {
                tracing::debug!(rank = self.bridge.rank().0, delivered, "block consumer hung up");
                return Ok(delivered);
            }
        }
        Ok(blocks)
    }

    fn enter(&self, station: Rank, phase: StationPhase) {
        tracing::debug!(
            rank = self.bridge.rank().0,
            station = station.0,
            ?phase,
            "station phase"
        );
    }

    fn receive_station(&self, plan: &StationPlan) -> TransposeResult<StationBlock> {
        let station = plan.station;
        let limits = &self.topology.limits;
        let malformed = |source| ProtocolError::Malformed { station, source };

        self.enter(station, StationPhase::WaitHeader);
        let raw = self
            .bridge
            .recv_blocking(BytesMut::zeroed(limits.max_header_bytes()), station, header_tag())?
            .freeze();
        let header = BlockHeader::decode(&raw, limits).map_err(malformed)?;
        self.check_header(plan, &header)?;

        let block_len = header.block_len();
        let beamlet_bytes = usize::try_from(block_len)
            .ok()
            .filter(|_| block_len <= limits.max_block_samples)
            .and_then(|samples| samples.checked_mul(self.topology.bytes_per_sample))
            .ok_or(ProtocolError::BlockTooLarge {
                station,
                samples: block_len,
            })?;

        let mut pending = Vec::with_capacity(plan.routes.len());
        for (entry, route) in header.beamlets.iter().zip(&plan.routes) {
            let handles = self.post_beamlet(station, entry, block_len, beamlet_bytes)?;
            pending.push((route.beamlet, handles));
        }
        let flags = self.bridge.post_receive(
            BytesMut::zeroed(limits.max_flags_bytes()),
            station,
            flags_tag(),
        )?;

        self.enter(station, StationPhase::WaitData);
        let mut beamlets = Vec::with_capacity(pending.len());
        for (beamlet, handles) in pending {
            let samples = self.collect_beamlet(station, beamlet, handles, beamlet_bytes)?;
            beamlets.push((beamlet, samples));
        }

        self.enter(station, StationPhase::WaitFlags);
        let raw_flags = flags
            .wait()?
            .into_buffer()
            .ok_or_else(|| BridgeError::aborted("flags receive completed as a send"))?;
        let flags = FlagSet::decode(&raw_flags, limits.max_flag_ranges).map_err(malformed)?;

        self.enter(station, StationPhase::StationDone);
        Ok(StationBlock {
            station,
            from: header.from,
            to: header.to,
            beamlets,
            flags,
            metadata: header.metadata,
        })
    }

    /// The header must list exactly the slots this rank expects from the
    /// station, in distribution order.
    fn check_header(&self, plan: &StationPlan, header: &BlockHeader) -> TransposeResult<()> {
        if header.nr_beamlets() != plan.routes.len() {
            return Err(ProtocolError::BeamletCount {
                station: plan.station,
                expected: plan.routes.len(),
                actual: header.nr_beamlets(),
            }
            .into());
        }
        for (position, (entry, route)) in header.beamlets.iter().zip(&plan.routes).enumerate() {
            if entry.station_beamlet != route.slot {
                return Err(ProtocolError::UnexpectedBeamlet {
                    station: plan.station,
                    position,
                    expected: route.slot,
                    actual: entry.station_beamlet,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Posts 2 receives when the wrap offset falls strictly inside the block,
    /// landing at `[0, wrap)` and `[wrap, len)` of one buffer; otherwise 1.
    fn post_beamlet(
        &self,
        station: Rank,
        entry: &BeamletEntry,
        block_len: u64,
        beamlet_bytes: usize,
    ) -> TransposeResult<BeamletHandles> {
        let slot = entry.station_beamlet;
        let mut head = BytesMut::zeroed(beamlet_bytes);
        match entry.split_at(block_len) {
            Some(wrap) => {
                let tail = head.split_off(wrap as usize * self.topology.bytes_per_sample);
                let first = self.bridge.post_receive(head, station, data_tag(slot, 0)?)?;
                let second = self.bridge.post_receive(tail, station, data_tag(slot, 1)?)?;
                Ok(smallvec![first, second])
            }
            None => {
                if entry.wrap_offset != 0 {
                    tracing::warn!(
                        station = station.0,
                        slot,
                        wrap_offset = entry.wrap_offset,
                        block_len,
                        "wrap offset outside the block; expecting a single transfer"
                    );
                }
                let whole = self.bridge.post_receive(head, station, data_tag(slot, 0)?)?;
                Ok(smallvec![whole])
            }
        }
    }

    /// Waits for a beamlet's transfers and rejoins them into one buffer.
    fn collect_beamlet(
        &self,
        station: Rank,
        beamlet: u32,
        handles: BeamletHandles,
        expected: usize,
    ) -> TransposeResult<Bytes> {
        let mut assembled: Option<BytesMut> = None;
        for handle in handles {
            let part = handle
                .wait()?
                .into_buffer()
                .ok_or_else(|| BridgeError::aborted("data receive completed as a send"))?;
            match assembled.as_mut() {
                // Contiguous halves of one allocation: unsplit does not copy.
                Some(head) => head.unsplit(part),
                None => assembled = Some(part),
            }
        }
        let samples = assembled.unwrap_or_default();
        if samples.len() != expected {
            return Err(ProtocolError::ShortTransfer {
                station,
                beamlet,
                expected,
                actual: samples.len(),
            }
            .into());
        }
        Ok(samples.freeze())
    }

    fn assemble(&self, stations: Vec<StationBlock>) -> TransposeResult<AssembledBlock> {
        let (from, to) = match stations.first() {
            Some(first) => (first.from, first.to),
            None => return Err(ConfigError::UnknownDestination(self.bridge.rank()).into()),
        };
        if let Some(odd) = stations.iter().find(|s| (s.from, s.to) != (from, to)) {
            return Err(ProtocolError::TimeRangeMismatch {
                station: odd.station,
                expected: (from, to),
                actual: (odd.from, odd.to),
            }
            .into());
        }

        let mut beamlets: BTreeMap<u32, Vec<StationSamples>> = BTreeMap::new();
        let mut flags = FlagSet::new();
        let mut contributions = Vec::with_capacity(stations.len());
        for block in stations {
            flags.union_with(&block.flags);
            for (beamlet, samples) in block.beamlets {
                beamlets.entry(beamlet).or_default().push(StationSamples {
                    station: block.station,
                    samples,
                });
            }
            contributions.push(StationContribution {
                station: block.station,
                flags: block.flags,
                metadata: block.metadata,
            });
        }

        tracing::info!(
            rank = self.bridge.rank().0,
            from,
            to,
            stations = contributions.len(),
            beamlets = beamlets.len(),
            flagged = flags.flagged_samples(),
            "assembled block"
        );
        Ok(AssembledBlock {
            from,
            to,
            beamlets,
            flags,
            stations: contributions,
        })
    }
}
