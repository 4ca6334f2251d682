//! Station ring-buffer geometry and the arena that backs it.
//!
//! The arena is one flat byte region laid out slot-major: slot `s` owns
//! samples `[s * capacity, (s + 1) * capacity)`. A timestamp `t` lives at ring
//! position `t % capacity` inside every slot, so a block that crosses the end
//! of a slot is described by two ranges, the tail of the slot followed by its
//! head.

use std::ops::Range;

use bytes::Bytes;
use smallvec::{smallvec, SmallVec};

use crate::error::{TransposeError, TransposeResult};

/// Contiguous run of samples inside an arena, by absolute sample index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampleRange {
    pub offset: usize,
    pub length: usize,
}

impl SampleRange {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end index.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn contains(&self, sample: usize) -> bool {
        sample >= self.offset && sample < self.end()
    }

    /// Checks the range lies within an arena of `limit` samples.
    pub fn validate(&self, limit: usize) -> TransposeResult<()> {
        match self.offset.checked_add(self.length) {
            Some(end) if end <= limit => Ok(()),
            _ => Err(TransposeError::RangeOutOfBounds {
                offset: self.offset,
                length: self.length,
                limit,
            }),
        }
    }

    fn byte_range(&self, bytes_per_sample: usize) -> Range<usize> {
        self.offset * bytes_per_sample..self.end() * bytes_per_sample
    }
}

/// Ranges covering one beamlet for one block, in time order.
pub type BeamletRanges = SmallVec<[SampleRange; 2]>;

/// Shared, immutable snapshot of a station's ring buffer.
#[derive(Clone, Debug)]
pub struct SampleArena {
    data: Bytes,
    slots: usize,
    capacity: usize,
    bytes_per_sample: usize,
}

impl SampleArena {
    /// Wraps `data` as `slots` rings of `capacity` samples each.
    pub fn new(
        data: Bytes,
        slots: usize,
        capacity: usize,
        bytes_per_sample: usize,
    ) -> TransposeResult<Self> {
        if slots == 0 || capacity == 0 || bytes_per_sample == 0 {
            return Err(TransposeError::invalid_block(
                "arena geometry must be non-zero",
            ));
        }
        let expected = slots
            .checked_mul(capacity)
            .and_then(|samples| samples.checked_mul(bytes_per_sample))
            .ok_or_else(|| TransposeError::invalid_block("arena geometry overflows"))?;
        if data.len() != expected {
            return Err(TransposeError::ArenaSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            slots,
            capacity,
            bytes_per_sample,
        })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Samples per slot.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bytes_per_sample
    }

    /// Total samples across all slots.
    pub fn samples(&self) -> usize {
        self.slots * self.capacity
    }

    pub fn ring(&self) -> SampleRing {
        SampleRing {
            slots: self.slots,
            capacity: self.capacity,
        }
    }

    /// Zero-copy view of `range`.
    pub fn slice(&self, range: &SampleRange) -> TransposeResult<Bytes> {
        range.validate(self.samples())?;
        Ok(self.data.slice(range.byte_range(self.bytes_per_sample)))
    }
}

/// Maps timestamps onto ring positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleRing {
    slots: usize,
    capacity: usize,
}

impl SampleRing {
    pub fn new(slots: usize, capacity: usize) -> Self {
        Self { slots, capacity }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ring position of `timestamp` within any slot.
    pub fn position(&self, timestamp: u64) -> usize {
        (timestamp % self.capacity as u64) as usize
    }

    /// Describes `[from, to)` for every slot, split at the wrap point.
    pub fn block(&self, from: u64, to: u64) -> TransposeResult<SampleBlock> {
        if self.capacity == 0 {
            return Err(TransposeError::invalid_block("ring has no capacity"));
        }
        let len = to
            .checked_sub(from)
            .ok_or_else(|| TransposeError::invalid_block(format!("[{from}, {to}) is reversed")))?;
        if len > self.capacity as u64 {
            return Err(TransposeError::invalid_block(format!(
                "block of {len} samples exceeds ring capacity {}",
                self.capacity
            )));
        }
        let len = len as usize;
        let start = self.position(from);
        let first = len.min(self.capacity - start);

        let ranges = (0..self.slots)
            .map(|slot| {
                let base = slot * self.capacity;
                let mut ranges: BeamletRanges = smallvec![SampleRange::new(base + start, first)];
                if first < len {
                    ranges.push(SampleRange::new(base, len - first));
                }
                ranges
            })
            .collect();

        Ok(SampleBlock { from, to, ranges })
    }
}

/// One block of a station's samples: `[from, to)` plus, per slot, the 1 or 2
/// arena ranges holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleBlock {
    pub from: u64,
    pub to: u64,
    ranges: Vec<BeamletRanges>,
}

impl SampleBlock {
    /// Builds a block from explicit per-slot ranges. Checked by [`SampleBlock::validate`].
    pub fn from_ranges(from: u64, to: u64, ranges: Vec<BeamletRanges>) -> Self {
        Self { from, to, ranges }
    }

    /// Samples per beamlet.
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self, slot: u32) -> Option<&[SampleRange]> {
        self.ranges.get(slot as usize).map(|r| r.as_slice())
    }

    /// Destination offset of the post-wrap range, or 0 for a single range.
    /// Exact for blocks that pass [`SampleBlock::validate`].
    pub fn wrap_offset(&self, slot: u32) -> u32 {
        match self.ranges(slot) {
            Some([first, _]) => first.length as u32,
            _ => 0,
        }
    }

    /// Checks the block against `arena`: one entry per slot, 1 or 2 in-bounds
    /// ranges per slot, lengths summing to the block length.
    pub fn validate(&self, arena: &SampleArena) -> TransposeResult<()> {
        if self.to < self.from {
            return Err(TransposeError::invalid_block(format!(
                "[{}, {}) is reversed",
                self.from, self.to
            )));
        }
        if self.len() > u64::from(u32::MAX) {
            return Err(TransposeError::invalid_block(format!(
                "block of {} samples cannot be addressed by 32-bit wrap offsets",
                self.len()
            )));
        }
        if self.ranges.len() != arena.slots() {
            return Err(TransposeError::invalid_block(format!(
                "block covers {} slots, arena has {}",
                self.ranges.len(),
                arena.slots()
            )));
        }
        for (slot, ranges) in self.ranges.iter().enumerate() {
            if ranges.is_empty() || ranges.len() > 2 {
                return Err(TransposeError::invalid_block(format!(
                    "slot {slot} has {} ranges",
                    ranges.len()
                )));
            }
            if ranges.len() == 2 && (ranges[0].length == 0 || ranges[1].length == 0) {
                return Err(TransposeError::invalid_block(format!(
                    "slot {slot} has an empty wrapped range"
                )));
            }
            let mut total = 0u64;
            for range in ranges {
                range.validate(arena.samples())?;
                total += range.length as u64;
            }
            if total != self.len() {
                return Err(TransposeError::invalid_block(format!(
                    "slot {slot} ranges cover {total} samples, block has {}",
                    self.len()
                )));
            }
        }
        Ok(())
    }
}
