use zerocopy::FromBytes;

use crate::error::{CodecError, CodecResult};

/// Forward-only cursor reading fixed-layout records out of a byte slice.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub(crate) fn read<T: FromBytes>(&mut self) -> CodecResult<T> {
        let size = std::mem::size_of::<T>();
        let value = T::read_from_prefix(&self.bytes[self.offset..]).ok_or(CodecError::Truncated {
            needed: self.offset + size,
            available: self.bytes.len(),
        })?;
        self.offset += size;
        Ok(value)
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}
