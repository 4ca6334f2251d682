use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{CodecError, CodecResult};
use crate::limits::HeaderLimits;
use crate::wire::Reader;

/// Fixed part of a header: `from`, `to`, `nrBeamlets`.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct HeaderPrefix {
    from: U64<LittleEndian>,
    to: U64<LittleEndian>,
    nr_beamlets: U32<LittleEndian>,
}

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct BeamletWire {
    station_beamlet: U32<LittleEndian>,
    wrap_offset: U32<LittleEndian>,
}

assert_eq_size!(HeaderPrefix, [u8; 20]);
assert_eq_size!(BeamletWire, [u8; 8]);

pub const HEADER_PREFIX_BYTES: usize = std::mem::size_of::<HeaderPrefix>();
pub const BEAMLET_ENTRY_BYTES: usize = std::mem::size_of::<BeamletWire>();
const METADATA_LENGTH_BYTES: usize = 4;

/// Per-beamlet layout of one block as seen by the sending station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BeamletEntry {
    /// Station-local beamlet slot.
    pub station_beamlet: u32,
    /// Destination offset, in samples, where the post-wrap transfer lands.
    /// Zero when the beamlet arrives in a single transfer.
    pub wrap_offset: u32,
}

impl BeamletEntry {
    pub fn single(station_beamlet: u32) -> Self {
        Self {
            station_beamlet,
            wrap_offset: 0,
        }
    }

    pub fn wrapped(station_beamlet: u32, wrap_offset: u32) -> Self {
        Self {
            station_beamlet,
            wrap_offset,
        }
    }

    /// Split point, when it lies strictly inside a block of `block_len` samples.
    pub fn split_at(&self, block_len: u64) -> Option<u32> {
        let wrap = self.wrap_offset;
        (wrap > 0 && u64::from(wrap) < block_len).then_some(wrap)
    }

    /// Number of data transfers carrying this beamlet: 2 when the wrap offset
    /// lies strictly inside the block, otherwise 1.
    pub fn transfer_count(&self, block_len: u64) -> usize {
        if self.split_at(block_len).is_some() {
            2
        } else {
            1
        }
    }
}

/// Record sent ahead of a block's data transfers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub from: u64,
    pub to: u64,
    /// Beamlets that follow, in the order their data transfers are addressed.
    pub beamlets: Vec<BeamletEntry>,
    /// Opaque caller blob delivered with the block.
    pub metadata: Bytes,
}

impl BlockHeader {
    /// Samples per beamlet in this block.
    pub fn block_len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn nr_beamlets(&self) -> usize {
        self.beamlets.len()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_PREFIX_BYTES
            + self.beamlets.len() * BEAMLET_ENTRY_BYTES
            + METADATA_LENGTH_BYTES
            + self.metadata.len()
    }

    fn check(&self, limits: &HeaderLimits) -> CodecResult<()> {
        if self.to < self.from {
            return Err(CodecError::InvalidTimeRange {
                from: self.from,
                to: self.to,
            });
        }
        if self.beamlets.len() > limits.max_beamlets as usize {
            return Err(CodecError::TooManyBeamlets {
                count: self.beamlets.len(),
                max: limits.max_beamlets,
            });
        }
        if self.metadata.len() > limits.max_metadata_bytes as usize {
            return Err(CodecError::MetadataTooLarge {
                len: self.metadata.len(),
                max: limits.max_metadata_bytes,
            });
        }
        Ok(())
    }

    pub fn encode(&self, limits: &HeaderLimits) -> CodecResult<Bytes> {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(limits, &mut out)?;
        Ok(out.freeze())
    }

    pub fn encode_into(&self, limits: &HeaderLimits, out: &mut BytesMut) -> CodecResult<()> {
        self.check(limits)?;
        out.reserve(self.encoded_len());

        let prefix = HeaderPrefix {
            from: U64::new(self.from),
            to: U64::new(self.to),
            nr_beamlets: U32::new(self.beamlets.len() as u32),
        };
        out.extend_from_slice(prefix.as_bytes());
        for entry in &self.beamlets {
            let wire = BeamletWire {
                station_beamlet: U32::new(entry.station_beamlet),
                wrap_offset: U32::new(entry.wrap_offset),
            };
            out.extend_from_slice(wire.as_bytes());
        }
        out.extend_from_slice(U32::<LittleEndian>::new(self.metadata.len() as u32).as_bytes());
        out.extend_from_slice(&self.metadata);
        Ok(())
    }

    /// Decodes a header occupying all of `bytes`. The metadata blob is a
    /// zero-copy slice of `bytes`.
    pub fn decode(bytes: &Bytes, limits: &HeaderLimits) -> CodecResult<Self> {
        let mut reader = Reader::new(bytes);
        let prefix: HeaderPrefix = reader.read()?;
        let (from, to) = (prefix.from.get(), prefix.to.get());
        if to < from {
            return Err(CodecError::InvalidTimeRange { from, to });
        }

        let count = prefix.nr_beamlets.get() as usize;
        if count > limits.max_beamlets as usize {
            return Err(CodecError::TooManyBeamlets {
                count,
                max: limits.max_beamlets,
            });
        }
        let mut beamlets = Vec::with_capacity(count);
        for _ in 0..count {
            let wire: BeamletWire = reader.read()?;
            beamlets.push(BeamletEntry {
                station_beamlet: wire.station_beamlet.get(),
                wrap_offset: wire.wrap_offset.get(),
            });
        }

        let declared = reader.read::<U32<LittleEndian>>()?.get();
        if declared > limits.max_metadata_bytes {
            return Err(CodecError::MetadataTooLarge {
                len: declared as usize,
                max: limits.max_metadata_bytes,
            });
        }
        let actual = reader.remaining();
        if actual != declared as usize {
            return Err(CodecError::MetadataLength { declared, actual });
        }
        let metadata = bytes.slice(reader.offset()..);

        Ok(Self {
            from,
            to,
            beamlets,
            metadata,
        })
    }
}
