//! A whole transpose group in one process: one loopback endpoint and one
//! polling bridge per rank.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use transport::{LoopbackEndpoint, LoopbackFabric, Rank};
use transport_bridge::{BridgeConfig, BridgeThread, TransportBridge};
use transpose::{Receiver, SampleArena, Sender, Topology, TransposeConfig};
use tracing_subscriber::EnvFilter;

pub type Bridge = Arc<TransportBridge<LoopbackEndpoint>>;

/// How long a poll thread may keep draining before a test gives up on it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// `RUST_LOG=transpose=debug cargo test -p tests` shows the phase traces.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Byte at `index` of a station's arena.
pub fn pattern(station: Rank, index: usize) -> u8 {
    ((index * 31 + station.0 as usize * 17 + index / 251) % 251) as u8
}

/// Bytes `station` holds for `slot` over `[from, to)`, in time order.
pub fn expected_samples(
    station: Rank,
    slot: usize,
    capacity: usize,
    bytes_per_sample: usize,
    from: u64,
    to: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity((to - from) as usize * bytes_per_sample);
    for timestamp in from..to {
        let position = (timestamp % capacity as u64) as usize;
        let base = (slot * capacity + position) * bytes_per_sample;
        out.extend((base..base + bytes_per_sample).map(|index| pattern(station, index)));
    }
    out
}

pub struct Group {
    pub topology: Arc<Topology>,
    pub fabric: LoopbackFabric,
    threads: Vec<BridgeThread<LoopbackEndpoint>>,
}

impl Group {
    pub fn new(size: usize, topology: Topology) -> anyhow::Result<Self> {
        let config = BridgeConfig {
            idle_wait: Duration::from_millis(5),
            ..BridgeConfig::default()
        };
        Self::with_bridge_config(size, topology, config)
    }

    pub fn from_config(size: usize, config: &TransposeConfig) -> anyhow::Result<Self> {
        Self::with_bridge_config(size, config.topology()?, config.bridge_config())
    }

    fn with_bridge_config(
        size: usize,
        topology: Topology,
        config: BridgeConfig,
    ) -> anyhow::Result<Self> {
        init_tracing();
        let fabric = LoopbackFabric::new(size);
        let threads = fabric
            .endpoints()
            .into_iter()
            .map(|endpoint| Arc::new(TransportBridge::new(endpoint, config.clone())).spawn())
            .collect::<Result<Vec<_>, _>>()
            .context("spawning poll threads")?;
        Ok(Self {
            topology: Arc::new(topology),
            fabric,
            threads,
        })
    }

    pub fn bridge(&self, rank: Rank) -> Bridge {
        Arc::clone(self.threads[rank.0 as usize].bridge())
    }

    /// Sender for `rank` over an arena of `capacity` samples per slot filled
    /// with [`pattern`].
    pub fn sender(&self, rank: Rank, capacity: usize) -> anyhow::Result<Sender<LoopbackEndpoint>> {
        let slots = self.topology.station(rank)?.slots();
        let bytes_per_sample = self.topology.bytes_per_sample;
        let data: Vec<u8> = (0..slots * capacity * bytes_per_sample)
            .map(|index| pattern(rank, index))
            .collect();
        let arena = SampleArena::new(Bytes::from(data), slots, capacity, bytes_per_sample)?;
        Ok(Sender::new(self.bridge(rank), Arc::clone(&self.topology), arena)?)
    }

    pub fn receiver(&self, rank: Rank) -> anyhow::Result<Receiver<LoopbackEndpoint>> {
        Ok(Receiver::new(self.bridge(rank), Arc::clone(&self.topology))?)
    }

    /// Stops every bridge and reports the first poll loop failure, including a
    /// bridge left draining by a send that was never received.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        let mut first = None;
        for (rank, thread) in std::mem::take(&mut self.threads).into_iter().enumerate() {
            if let Err(err) = thread.shutdown_timeout(SHUTDOWN_GRACE) {
                first.get_or_insert(anyhow::Error::new(err).context(format!("rank {rank}")));
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        for thread in self.threads.drain(..) {
            let _ = thread.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}
