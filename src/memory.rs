use crate::{common::word::Word, error::VmError};

/// Per-frame cap on addressable memory. Requests past it fault with
/// `MemoryLimit` before any allocation happens.
pub const MEMORY_LIMIT_BYTES: usize = 1 << 26;

const WORD_BYTES: usize = 32;

/// Byte-addressable frame memory. The touched cursor (`len_bytes`) only
/// ever grows and is kept 32-byte aligned; the physical buffer expands in
/// at-least-doubling steps so growth is amortised O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    buf: Vec<u8>,
    len_bytes: usize,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes ever touched, rounded up to a word boundary.
    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    pub fn len_words(&self) -> usize {
        self.len_bytes / WORD_BYTES
    }

    /// Physical backing allocation, in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Words needed to cover `offset + len`; 0 when the range is empty.
    pub fn words_for(offset: usize, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        (offset + len).div_ceil(WORD_BYTES)
    }

    /// Validates a `(offset, len)` range given as words against the frame
    /// memory cap and returns it as `usize`s.
    pub fn range(offset: &Word, len: &Word) -> Result<(usize, usize), VmError> {
        if !len.fits_u64() || len.as_u64() as usize > MEMORY_LIMIT_BYTES {
            return Err(VmError::MemoryLimit);
        }
        let len_usize = len.as_usize();
        if len_usize == 0 {
            // offset is ignored by zero-length accesses
            return Ok((0, 0));
        }
        let end = offset.as_u64() as u128 + len_usize as u128;
        if !offset.fits_u64() || end > MEMORY_LIMIT_BYTES as u128 {
            return Err(VmError::MemoryLimit);
        }
        Ok((offset.as_usize(), len_usize))
    }

    /// Gas delta for growing the touched region to `new_words`, computed
    /// before any mutation: `C(n) = 3n + n^2 / 512`.
    pub fn expansion_cost(&self, new_words: usize) -> u64 {
        let current = self.len_words();
        if new_words <= current {
            return 0;
        }
        Self::words_cost(new_words) - Self::words_cost(current)
    }

    fn words_cost(words: usize) -> u64 {
        let n = words as u64;
        3 * n + n * n / 512
    }

    fn ensure(&mut self, end: usize) {
        if end == 0 {
            return;
        }
        let aligned = end.div_ceil(WORD_BYTES) * WORD_BYTES;
        if aligned > self.buf.len() {
            let grown = self.buf.len().max(WORD_BYTES) * 2;
            self.buf.resize(aligned.max(grown).next_power_of_two(), 0);
        }
        if aligned > self.len_bytes {
            self.len_bytes = aligned;
        }
    }

    /// Copy of `len` bytes at `offset`; the touched region extends over the
    /// whole range and any tail past the previous cursor reads as zero.
    pub fn read(&mut self, offset: usize, len: usize) -> Vec<u8> {
        if len == 0 {
            return Vec::new();
        }
        self.ensure(offset + len);
        self.buf[offset..offset + len].to_vec()
    }

    pub fn load_word(&mut self, offset: usize) -> Word {
        self.ensure(offset + WORD_BYTES);
        Word::from_bytes(&self.buf[offset..offset + WORD_BYTES])
    }

    pub fn write(&mut self, offset: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.ensure(offset + data.len());
        self.buf[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn store_word(&mut self, offset: usize, value: &Word) {
        self.write(offset, &value.into_bytes());
    }

    pub fn store_byte(&mut self, offset: usize, value: u8) {
        self.ensure(offset + 1);
        self.buf[offset] = value;
    }

    /// Overlap-safe copy, as if through a temporary buffer.
    pub fn copy(&mut self, dst: usize, src: usize, len: usize) {
        if len == 0 {
            return;
        }
        let end = dst.max(src) + len;
        self.ensure(end);
        self.buf.copy_within(src..src + len, dst);
    }

    /// By-value copy of the touched region.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf[..self.len_bytes].to_vec()
    }
}
