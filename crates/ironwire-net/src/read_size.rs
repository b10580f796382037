//! Read buffer sizing for the TCP reader.

const KIB: usize = 1024;

/// Buffer sizes the reader moves between.
const SIZES: [usize; 13] = [
    KIB,
    2 * KIB,
    4 * KIB,
    8 * KIB,
    16 * KIB,
    20 * KIB,
    24 * KIB,
    28 * KIB,
    32 * KIB,
    40 * KIB,
    48 * KIB,
    56 * KIB,
    64 * KIB,
];

/// Index of the 8 KiB starting size.
const INITIAL: usize = 3;

/// Picks the next read buffer size from the last read.
///
/// A read that fills the buffer moves one step up the ladder. A read that
/// would have fit the next smaller size moves one step down. Anything in
/// between keeps the current size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveReadSize {
    index: usize,
}

impl AdaptiveReadSize {
    /// Start at 8 KiB.
    pub fn new() -> Self {
        Self { index: INITIAL }
    }

    /// Buffer size for the next read
    pub fn current(&self) -> usize {
        SIZES[self.index]
    }

    /// Record how many bytes the last read returned.
    pub fn record(&mut self, read: usize) {
        if read >= self.current() {
            self.index = (self.index + 1).min(SIZES.len() - 1);
        } else if self.index > 0 && read <= SIZES[self.index - 1] {
            self.index -= 1;
        }
    }
}

impl Default for AdaptiveReadSize {
    fn default() -> Self {
        Self::new()
    }
}
