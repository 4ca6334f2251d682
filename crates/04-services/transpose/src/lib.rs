//! Transpose layer between station producers and beamlet consumers.
//!
//! Each station holds a ring buffer of samples for its beamlets. Once per
//! block the [`Sender`] on a station rank ships every beamlet to the rank the
//! [`BeamletDistribution`] assigns it to; the [`Receiver`] on that rank
//! collects the beamlet from every station and hands the assembled block on.
//!
//! Per (station, destination) pair a block travels as a header, the sample
//! data (one or two transfers per beamlet, depending on whether the block
//! crosses the ring's wrap point) and a flag set, all over a shared
//! [`transport_bridge::TransportBridge`].

mod config;
mod distribution;
mod error;
mod receiver;
mod ring;
mod sender;
mod tags;

pub use config::{
    BlockSection, BridgeSection, DistributionSection, LimitsSection, StationSection,
    TransposeConfig,
};
pub use distribution::{BeamletDistribution, BeamletRoute, StationLayout, Topology};
pub use error::{ConfigError, ProtocolError, TransposeError, TransposeResult};
pub use receiver::{AssembledBlock, Receiver, StationContribution, StationPhase, StationSamples};
pub use ring::{BeamletRanges, SampleArena, SampleBlock, SampleRange, SampleRing};
pub use sender::{BeamletHandles, BlockTransfer, DestinationTransfer, Sender};
pub use tags::{data_tag, flags_tag, header_tag, TagKind, MAX_SLOT};
