//! First header byte flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// High nibble of the first header byte.
    ///
    /// RSV1-3 are reserved for extensions. No extension is negotiated by this
    /// codec, so the parser rejects any frame that sets them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FrameFlags: u8 {
        /// Final fragment of a message
        const FIN = 0b1000_0000;
        /// Extension bit 1
        const RSV1 = 0b0100_0000;
        /// Extension bit 2
        const RSV2 = 0b0010_0000;
        /// Extension bit 3
        const RSV3 = 0b0001_0000;
    }
}

impl FrameFlags {
    /// All reserved bits
    pub const RESERVED: Self = Self::RSV1.union(Self::RSV2).union(Self::RSV3);

    /// Extract the flags from a raw first header byte.
    pub fn from_header_byte(byte: u8) -> Self {
        Self::from_bits_truncate(byte)
    }

    /// Whether FIN is set
    pub fn is_final(self) -> bool {
        self.contains(Self::FIN)
    }

    /// Whether any reserved bit is set
    pub fn has_reserved(self) -> bool {
        self.intersects(Self::RESERVED)
    }
}
