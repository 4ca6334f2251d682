use std::path::PathBuf;

use thiserror::Error;
use transport::Rank;
use transport_bridge::BridgeError;
use transpose_codecs::CodecError;

pub type TransposeResult<T> = Result<T, TransposeError>;

/// Start-up configuration problems. Detected before any block is exchanged.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("the beamlet distribution is empty")]
    EmptyDistribution,

    #[error("{0} appears more than once in the beamlet distribution")]
    DuplicateDestination(Rank),

    #[error("beamlet {beamlet} is assigned to both {first} and {second}")]
    OverlappingOwnership { beamlet: u32, first: Rank, second: Rank },

    #[error("beamlet {0} is distributed but no station produces it")]
    UnproducedBeamlet(u32),

    #[error("{0} is configured as a station more than once")]
    DuplicateStation(Rank),

    #[error("{station} produces beamlet {beamlet} from more than one slot")]
    DuplicateSlot { station: Rank, beamlet: u32 },

    #[error("{station} has {slots} beamlet slots; at most {max} are addressable")]
    TooManySlots { station: Rank, slots: usize, max: u32 },

    #[error("{station} sends {count} beamlets to {dest}; one header carries at most {max}")]
    TooManyBeamlets {
        station: Rank,
        dest: Rank,
        count: usize,
        max: u32,
    },

    #[error("{0} is not a configured station")]
    UnknownStation(Rank),

    #[error("{0} is not a destination in the beamlet distribution")]
    UnknownDestination(Rank),

    #[error("`{0}` must be non-zero")]
    ZeroLimit(&'static str),
}

/// Sender and receiver disagree about a block. Indicates version skew or a bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{station} header lists {actual} beamlets; {expected} expected")]
    BeamletCount {
        station: Rank,
        expected: usize,
        actual: usize,
    },

    #[error("{station} header entry {position} names slot {actual}; slot {expected} expected")]
    UnexpectedBeamlet {
        station: Rank,
        position: usize,
        expected: u32,
        actual: u32,
    },

    #[error("{station} sent block (from, to) = {actual:?} while others sent {expected:?}")]
    TimeRangeMismatch {
        station: Rank,
        expected: (u64, u64),
        actual: (u64, u64),
    },

    #[error("{station} delivered {actual} of {expected} bytes for beamlet {beamlet}")]
    ShortTransfer {
        station: Rank,
        beamlet: u32,
        expected: usize,
        actual: usize,
    },

    #[error("{station} announced a block of {samples} samples, too large to buffer")]
    BlockTooLarge { station: Rank, samples: u64 },

    #[error("malformed record from {station}: {source}")]
    Malformed {
        station: Rank,
        #[source]
        source: CodecError,
    },
}

#[derive(Debug, Error)]
pub enum TransposeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("sample range [{offset}, {offset}+{length}) exceeds the arena's {limit} samples")]
    RangeOutOfBounds {
        offset: usize,
        length: usize,
        limit: usize,
    },

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("arena holds {actual} bytes; its geometry requires {expected}")]
    ArenaSize { expected: usize, actual: usize },

    #[error("beamlet slot {0} cannot be encoded in a data tag")]
    SlotOutOfRange(u32),

    #[error("station worker panicked")]
    WorkerPanicked,
}

impl TransposeError {
    pub fn invalid_block(msg: impl Into<String>) -> Self {
        TransposeError::InvalidBlock(msg.into())
    }
}
