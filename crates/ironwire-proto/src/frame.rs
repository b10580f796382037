//! Frame values exchanged between the codec and the connection layer.

use bytes::Bytes;

use crate::{close::CloseInfo, mask::MaskKey, opcodes::Opcode};

/// Frame kind and payload.
///
/// Continuation frames never appear here: the parser reassembles fragmented
/// messages before handing them out, and the generator always emits final
/// frames. Matching on this enum is exhaustive, so a new kind cannot bypass
/// control-frame handling in the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// UTF-8 text message
    Text(String),
    /// Binary message
    Binary(Bytes),
    /// Keep-alive probe with optional application data
    Ping(Bytes),
    /// Keep-alive reply
    Pong(Bytes),
    /// Close handshake
    Close(CloseInfo),
}

/// A complete WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Kind and payload
    pub body: FrameBody,
    /// Masking key. Required on the wire for client-originated frames. The
    /// payload held in `body` is always unmasked.
    pub mask: Option<MaskKey>,
}

impl Frame {
    /// Unmasked frame with the given body
    pub fn new(body: FrameBody) -> Self {
        Self { body, mask: None }
    }

    /// Text frame
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameBody::Text(text.into()))
    }

    /// Binary frame
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(FrameBody::Binary(data.into()))
    }

    /// Ping frame
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(FrameBody::Ping(data.into()))
    }

    /// Pong frame
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(FrameBody::Pong(data.into()))
    }

    /// Close frame
    pub fn close(info: CloseInfo) -> Self {
        Self::new(FrameBody::Close(info))
    }

    /// Wire opcode
    pub fn opcode(&self) -> Opcode {
        match self.body {
            FrameBody::Text(_) => Opcode::Text,
            FrameBody::Binary(_) => Opcode::Binary,
            FrameBody::Ping(_) => Opcode::Ping,
            FrameBody::Pong(_) => Opcode::Pong,
            FrameBody::Close(_) => Opcode::Close,
        }
    }

    /// Whether this is a Close, Ping or Pong frame
    pub fn is_control(&self) -> bool {
        self.opcode().is_control()
    }

    /// Whether a masking key is attached
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Attach a masking key
    pub fn set_mask(&mut self, mask: MaskKey) {
        self.mask = Some(mask);
    }

    /// Unmasked payload bytes as they will be encoded
    pub fn payload(&self) -> Bytes {
        match &self.body {
            FrameBody::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            FrameBody::Binary(data) | FrameBody::Ping(data) | FrameBody::Pong(data) => {
                data.clone()
            },
            FrameBody::Close(info) => info.to_payload(),
        }
    }

    /// Encoded payload length
    pub fn payload_len(&self) -> usize {
        match &self.body {
            FrameBody::Text(text) => text.len(),
            FrameBody::Binary(data) | FrameBody::Ping(data) | FrameBody::Pong(data) => data.len(),
            FrameBody::Close(info) => info.payload_len(),
        }
    }

    /// Close info if this is a Close frame
    pub fn close_info(&self) -> Option<&CloseInfo> {
        match &self.body {
            FrameBody::Close(info) => Some(info),
            _ => None,
        }
    }
}
