//! Splitting firmware blobs into protocol-sized units.

use crate::error::{Error, Result};

/// A borrowed slice of a blob with its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Sequence number, starting at 0.
    pub index: usize,
    /// Byte offset within the blob.
    pub offset: usize,
    /// Device address (`base + offset`).
    pub address: u32,
    /// The bytes of this chunk.
    pub data: &'a [u8],
}

impl Chunk<'_> {
    /// Length of the chunk.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}

/// Iterator over contiguous chunks of at most `size` bytes.
///
/// Yields `ceil(len / size)` chunks whose offsets are strictly increasing and
/// whose lengths add up to the blob length.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    data: &'a [u8],
    size: usize,
    base: u32,
    index: usize,
    offset: usize,
}

impl<'a> Chunks<'a> {
    /// Chunk `data` into units of `size` bytes addressed from `base`.
    pub fn new(data: &'a [u8], size: usize, base: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidInput("chunk size must be non-zero".into()));
        }
        Ok(Self {
            data,
            size,
            base,
            index: 0,
            offset: 0,
        })
    }

    /// Total number of chunks.
    pub fn count_total(&self) -> usize {
        self.data
            .len()
            .div_ceil(self.size)
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.size).min(self.data.len());
        let chunk = Chunk {
            index: self.index,
            offset: self.offset,
            // Firmware images are far below 4 GiB
            address: self
                .base
                .wrapping_add(self.offset as u32),
            data: &self.data[self.offset..end],
        };
        self.index += 1;
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.data.len() - self.offset).div_ceil(self.size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
