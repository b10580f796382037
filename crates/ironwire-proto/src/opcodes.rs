//! Frame opcodes.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Frame opcode (low nibble of the first header byte)
///
/// Values 0x3-0x7 and 0xB-0xF are reserved and rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// UTF-8 text data
    Text = 0x1,
    /// Binary data
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Keep-alive probe
    Ping = 0x9,
    /// Keep-alive reply
    Pong = 0xA,
}

impl Opcode {
    /// Parse the opcode nibble.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }

    /// Wire value
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong are control frames
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for opcode in [
            Opcode::Continuation,
            Opcode::Text,
            Opcode::Binary,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ] {
            assert_eq!(Opcode::from_u8(opcode.to_u8()), Ok(opcode));
        }
    }

    #[test]
    fn reserved_opcodes_rejected() {
        for value in (0x3..=0x7).chain(0xB..=0xF) {
            assert_eq!(Opcode::from_u8(value), Err(ProtocolError::InvalidOpcode(value)));
        }
    }

    #[test]
    fn control_classification() {
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Close.is_control());
        assert!(!Opcode::Text.is_control());
        assert!(!Opcode::Continuation.is_control());
    }
}
