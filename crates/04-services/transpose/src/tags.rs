//! Tag layout for the three conversations a station holds with each destination.
//!
//! ```text
//!  31        24 23                      1   0
//! +------------+-------------------------+---+
//! |    kind    |    station beamlet slot | r |
//! +------------+-------------------------+---+
//! ```
//!
//! `r` is the range index of a data transfer: 0 for the whole or pre-wrap
//! range, 1 for the post-wrap range. Header and flag tags leave the low bits
//! zero.

use transport::Tag;

use crate::error::{TransposeError, TransposeResult};

const KIND_SHIFT: u32 = 24;
const SLOT_SHIFT: u32 = 1;

/// Highest station slot a data tag can carry.
pub const MAX_SLOT: u32 = (1 << (KIND_SHIFT - SLOT_SHIFT)) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagKind {
    Header = 1,
    Data = 2,
    Flags = 3,
}

pub fn header_tag() -> Tag {
    Tag((TagKind::Header as u32) << KIND_SHIFT)
}

pub fn flags_tag() -> Tag {
    Tag((TagKind::Flags as u32) << KIND_SHIFT)
}

/// Tag for range `range` (0 or 1) of the beamlet in station slot `slot`.
pub fn data_tag(slot: u32, range: usize) -> TransposeResult<Tag> {
    if slot > MAX_SLOT || range > 1 {
        return Err(TransposeError::SlotOutOfRange(slot));
    }
    Ok(Tag(
        ((TagKind::Data as u32) << KIND_SHIFT) | (slot << SLOT_SHIFT) | range as u32,
    ))
}
