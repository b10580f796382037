//! Wire format for WebSocket connections (RFC 6455).
//!
//! A frame is a 2 to 14 byte header followed by an optionally masked payload.
//! This crate owns the byte-level grammar: [`Generator`] turns a [`Frame`] into
//! bytes, [`Parser`] turns an arbitrary sequence of byte chunks back into
//! frames. Policy (which side masks, how large a message may grow) comes from
//! [`WebSocketPolicy`] and is supplied by the connection layer.
//!
//! Fragmented data messages are reassembled by the parser, so consumers only
//! ever see the five frame kinds modelled by [`FrameBody`].
//!
//! # Security
//!
//! Every length is checked against the policy before any payload is
//! buffered. Control frames are capped at 125 bytes by the protocol and text
//! payloads are validated as UTF-8 before they are handed out.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod generator;
pub mod mask;
pub mod opcodes;
pub mod parser;
pub mod policy;

pub use close::{CloseInfo, StatusCode};
pub use errors::{ProtocolError, Result};
pub use flags::FrameFlags;
pub use frame::{Frame, FrameBody};
pub use generator::{Generator, MAX_HEADER_LENGTH};
pub use mask::{MaskKey, apply_mask};
pub use opcodes::Opcode;
pub use parser::Parser;
pub use policy::{Behavior, WebSocketPolicy};
