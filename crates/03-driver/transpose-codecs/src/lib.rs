//! Wire codecs for the transpose protocol.
//!
//! Two self-delimiting records travel alongside each block's sample data: the
//! [`BlockHeader`], sent ahead of the data and describing how each beamlet's
//! bytes are split, and the [`FlagSet`], sent after it and listing the flagged
//! sample intervals. Both encode fixed-width little-endian integers so that
//! every rank decodes the same bytes regardless of host architecture.

mod error;
mod flags;
mod header;
mod limits;
mod wire;

pub use error::{CodecError, CodecResult};
pub use flags::{union, FlagSet};
pub use header::{BeamletEntry, BlockHeader, BEAMLET_ENTRY_BYTES, HEADER_PREFIX_BYTES};
pub use limits::HeaderLimits;
