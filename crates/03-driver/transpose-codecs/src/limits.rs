use crate::header::{BEAMLET_ENTRY_BYTES, HEADER_PREFIX_BYTES};

/// Bounds applied when encoding and decoding transpose records.
///
/// Receivers size their header and flags buffers from these, so both ends of
/// a transpose group must agree on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderLimits {
    pub max_beamlets: u32,
    pub max_metadata_bytes: u32,
    pub max_flag_ranges: u32,
    /// Longest block, in samples per beamlet, a receiver will buffer.
    pub max_block_samples: u64,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self {
            max_beamlets: 512,
            max_metadata_bytes: 4096,
            max_flag_ranges: 1024,
            max_block_samples: 1 << 20,
        }
    }
}

impl HeaderLimits {
    /// Size of the largest header these limits admit.
    pub fn max_header_bytes(&self) -> usize {
        HEADER_PREFIX_BYTES
            + self.max_beamlets as usize * BEAMLET_ENTRY_BYTES
            + 4
            + self.max_metadata_bytes as usize
    }

    /// Size of the largest flags record these limits admit.
    pub fn max_flags_bytes(&self) -> usize {
        4 + self.max_flag_ranges as usize * 8
    }
}
