//! Error types for WebSocket frame parsing and generation.

use thiserror::Error;

use crate::{close::StatusCode, opcodes::Opcode};

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol-level errors
///
/// Every variant maps to the close status code the connection layer should
/// send back when it gives up on the peer, see [`ProtocolError::close_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Opcode is not one defined by RFC 6455
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// A reserved header bit was set without a negotiated extension
    #[error("reserved header bits set: {0:#04b}")]
    ReservedBitsSet(u8),

    /// Control frames must not be fragmented
    #[error("fragmented {0:?} control frame")]
    FragmentedControlFrame(Opcode),

    /// Control frame payload exceeds 125 bytes
    #[error("{opcode:?} payload too large: {size} bytes (max 125)")]
    ControlFrameTooLarge {
        /// Control frame opcode
        opcode: Opcode,
        /// Declared payload size
        size: u64,
    },

    /// Message exceeds the configured policy limit
    #[error("message too large: {size} bytes (max {limit})")]
    MessageTooLarge {
        /// Size the message would reach
        size: u64,
        /// Configured limit
        limit: usize,
    },

    /// 64-bit payload length with the most significant bit set
    #[error("invalid payload length encoding")]
    InvalidPayloadLength,

    /// A server received a frame the client did not mask
    #[error("client frame is not masked")]
    UnmaskedClientFrame,

    /// A client received a frame the server masked
    #[error("server frame is masked")]
    MaskedServerFrame,

    /// Continuation frame without a message in progress
    #[error("continuation frame without a fragmented message in progress")]
    UnexpectedContinuation,

    /// New data frame while a fragmented message is still open
    #[error("{0:?} frame while a fragmented message is in progress")]
    ExpectedContinuation(Opcode),

    /// Text payload or close reason is not valid UTF-8
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Close payload carries a code that must not appear on the wire
    #[error("invalid close status code: {0}")]
    InvalidCloseCode(u16),

    /// Close payload of exactly one byte
    #[error("close payload truncated")]
    TruncatedClosePayload,
}

impl ProtocolError {
    /// Close status code to report to the peer for this error.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidUtf8 => StatusCode::BAD_PAYLOAD,
            Self::MessageTooLarge { .. } => StatusCode::MESSAGE_TOO_LARGE,
            _ => StatusCode::PROTOCOL,
        }
    }
}
