//! Fixed-capacity scratch buffer for stream reassembly.
//!
//! The buffer is allocated once at construction and never grows. Callers
//! append into the spare tail, consume from the head, and compact when the
//! buffer fills without producing a frame.

use crate::ingest::FetchError;

/// Owned, fixed-capacity byte buffer with sliding-window consumption.
pub struct ByteBuffer {
    storage: Box<[u8]>,
    len: usize,
}

impl ByteBuffer {
    /// Allocate a buffer of exactly `capacity` bytes.
    ///
    /// Allocation failure is reported instead of aborting the process.
    pub fn with_capacity(capacity: usize) -> Result<Self, FetchError> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| FetchError::Allocation { requested: capacity })?;
        storage.resize(capacity, 0);
        Ok(Self {
            storage: storage.into_boxed_slice(),
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Buffered bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Copy as much of `bytes` as fits. Returns the number of bytes taken.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.remaining());
        self.storage[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
        take
    }

    /// Fill the spare tail using `fill`, which returns how many bytes it wrote.
    ///
    /// At most `max_len` bytes are offered. The reported count is clamped to
    /// the offered slice.
    pub fn fill_with<E>(
        &mut self,
        max_len: usize,
        fill: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let offer = max_len.min(self.remaining());
        let start = self.len;
        let written = fill(&mut self.storage[start..start + offer])?;
        let written = written.min(offer);
        self.len += written;
        Ok(written)
    }

    /// Drop the first `count` bytes, shifting the rest to the front.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.storage.copy_within(count..self.len, 0);
        self.len -= count;
    }

    /// Discard the oldest half of the buffered bytes. Returns bytes discarded.
    pub fn compact_half(&mut self) -> usize {
        let discard = self.len - self.len / 2;
        self.consume(discard);
        discard
    }

    /// Keep only the newest `keep` bytes. Returns bytes discarded.
    pub fn retain_tail(&mut self, keep: usize) -> usize {
        let discard = self.len.saturating_sub(keep);
        self.consume(discard);
        discard
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Position of the first occurrence of `needle` at or after `from`.
    pub fn find(&self, needle: &[u8], from: usize) -> Option<usize> {
        find_subslice(self.as_slice(), needle, from)
    }
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
