use std::ops::Range;

use bytes::{Bytes, BytesMut};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::error::{CodecError, CodecResult};
use crate::wire::Reader;

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct IntervalWire {
    start: U32<LittleEndian>,
    end: U32<LittleEndian>,
}

/// Flagged sample indices of one block as ascending, non-overlapping,
/// non-adjacent half-open intervals relative to the block start.
///
/// Every constructor normalises, so two sets flagging the same indices
/// compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FlagSet {
    ranges: Vec<Range<u32>>,
}

fn push_coalesced(ranges: &mut Vec<Range<u32>>, range: Range<u32>) {
    if range.is_empty() {
        return;
    }
    match ranges.last_mut() {
        Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
        _ => ranges.push(range),
    }
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from arbitrary intervals, dropping empty ones and merging
    /// overlapping or adjacent ones.
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range<u32>>,
    {
        let mut input: Vec<Range<u32>> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        input.sort_unstable_by_key(|r| r.start);
        let mut merged = Vec::with_capacity(input.len());
        for range in input {
            push_coalesced(&mut merged, range);
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[Range<u32>] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Total number of flagged samples.
    pub fn flagged_samples(&self) -> u64 {
        self.ranges.iter().map(|r| u64::from(r.end - r.start)).sum()
    }

    pub fn contains(&self, index: u32) -> bool {
        let pos = self.ranges.partition_point(|r| r.end <= index);
        self.ranges.get(pos).is_some_and(|r| r.start <= index)
    }

    /// Flags `range` in place.
    pub fn insert(&mut self, range: Range<u32>) {
        if range.is_empty() {
            return;
        }
        let single = FlagSet {
            ranges: vec![range],
        };
        self.union_with(&single);
    }

    /// Merges both interval lists into the minimal ascending representation.
    pub fn union(&self, other: &FlagSet) -> FlagSet {
        let mut merged = Vec::with_capacity(self.ranges.len() + other.ranges.len());
        let (mut a, mut b) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x.start <= y.start => a.next(),
                (Some(_), Some(_)) => b.next(),
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            if let Some(range) = next {
                push_coalesced(&mut merged, range.clone());
            }
        }
        FlagSet { ranges: merged }
    }

    pub fn union_with(&mut self, other: &FlagSet) {
        if other.is_empty() {
            return;
        }
        *self = self.union(other);
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.ranges.len() * std::mem::size_of::<IntervalWire>()
    }

    /// Encodes the set, rejecting it if it has more than `max_ranges` intervals.
    pub fn encode(&self, max_ranges: u32) -> CodecResult<Bytes> {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(max_ranges, &mut out)?;
        Ok(out.freeze())
    }

    pub fn encode_into(&self, max_ranges: u32, out: &mut BytesMut) -> CodecResult<()> {
        if self.ranges.len() > max_ranges as usize {
            return Err(CodecError::TooManyFlagRanges {
                count: self.ranges.len(),
                max: max_ranges,
            });
        }
        out.reserve(self.encoded_len());
        out.extend_from_slice(U32::<LittleEndian>::new(self.ranges.len() as u32).as_bytes());
        for range in &self.ranges {
            let wire = IntervalWire {
                start: U32::new(range.start),
                end: U32::new(range.end),
            };
            out.extend_from_slice(wire.as_bytes());
        }
        Ok(())
    }

    /// Decodes a flags record occupying all of `bytes`.
    ///
    /// Intervals must be non-empty and ascending without overlap; adjacent
    /// intervals are accepted and merged.
    pub fn decode(bytes: &[u8], max_ranges: u32) -> CodecResult<FlagSet> {
        let mut reader = Reader::new(bytes);
        let count = reader.read::<U32<LittleEndian>>()?.get() as usize;
        if count > max_ranges as usize {
            return Err(CodecError::TooManyFlagRanges {
                count,
                max: max_ranges,
            });
        }

        let mut ranges: Vec<Range<u32>> = Vec::with_capacity(count);
        for _ in 0..count {
            let wire: IntervalWire = reader.read()?;
            let (start, end) = (wire.start.get(), wire.end.get());
            if start >= end {
                return Err(CodecError::EmptyFlagRange { start, end });
            }
            if let Some(previous) = ranges.last() {
                if start < previous.end {
                    return Err(CodecError::FlagsNotAscending {
                        previous_end: previous.end,
                        start,
                    });
                }
            }
            push_coalesced(&mut ranges, start..end);
        }

        match reader.remaining() {
            0 => Ok(FlagSet { ranges }),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }
}

impl FromIterator<Range<u32>> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Range<u32>>>(iter: I) -> Self {
        FlagSet::from_ranges(iter)
    }
}

/// Union of two flag sets; see [`FlagSet::union`].
pub fn union(a: &FlagSet, b: &FlagSet) -> FlagSet {
    a.union(b)
}
