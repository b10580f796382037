//! Growable buffers for record processing.
//!
//! Engines write into plain `&mut [u8]` slices, so the channel keeps its
//! buffers zero-initialised and tracks the filled prefix itself.

use bytes::{Bytes, BytesMut};

/// Zero-initialised buffer with a filled prefix.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    buf: BytesMut,
    filled: usize,
}

impl RecordBuffer {
    /// Empty buffer with `capacity` writable bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::zeroed(capacity), filled: 0 }
    }

    /// Total writable size
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Unwritten tail of the buffer.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Mark `n` more bytes as written.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.buf.len());
        self.filled = (self.filled + n).min(self.buf.len());
    }

    /// Grow to at least `min` writable bytes, keeping what was written.
    pub fn ensure_capacity(&mut self, min: usize) {
        if self.buf.len() < min {
            self.buf.resize(min, 0);
        }
    }

    /// The written prefix.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Consume the buffer and return the written prefix.
    pub fn freeze(mut self) -> Bytes {
        self.buf.truncate(self.filled);
        self.buf.freeze()
    }

    /// Take the written prefix and reset to an empty buffer of
    /// `fresh_capacity` bytes.
    pub fn take(&mut self, fresh_capacity: usize) -> Bytes {
        std::mem::replace(self, Self::with_capacity(fresh_capacity)).freeze()
    }
}

/// Combine leftover undecoded bytes with newly received bytes.
///
/// With no leftover the incoming buffer is adopted as-is; otherwise both are
/// copied, in order, into one contiguous buffer.
pub fn merge(remainder: Bytes, incoming: Bytes) -> Bytes {
    if remainder.is_empty() {
        return incoming;
    }
    if incoming.is_empty() {
        return remainder;
    }
    let mut merged = BytesMut::with_capacity(remainder.len() + incoming.len());
    merged.extend_from_slice(&remainder);
    merged.extend_from_slice(&incoming);
    merged.freeze()
}
