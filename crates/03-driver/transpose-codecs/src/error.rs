use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

/// Malformed or oversize records. Always a protocol error for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("record truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("time range [{from}, {to}) is reversed")]
    InvalidTimeRange { from: u64, to: u64 },

    #[error("{count} beamlets exceed the limit of {max}")]
    TooManyBeamlets { count: usize, max: u32 },

    #[error("{len}-byte metadata exceeds the limit of {max} bytes")]
    MetadataTooLarge { len: usize, max: u32 },

    #[error("metadata declares {declared} bytes but {actual} were transferred")]
    MetadataLength { declared: u32, actual: usize },

    #[error("{count} flag intervals exceed the limit of {max}")]
    TooManyFlagRanges { count: usize, max: u32 },

    #[error("flag interval [{start}, {end}) is empty or reversed")]
    EmptyFlagRange { start: u32, end: u32 },

    #[error("flag interval starting at {start} overlaps or precedes one ending at {previous_end}")]
    FlagsNotAscending { previous_end: u32, start: u32 },

    #[error("{0} unexpected bytes after the record")]
    TrailingBytes(usize),
}
