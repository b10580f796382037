//! Error types for connection operations.

use ironwire_proto::ProtocolError;
use thiserror::Error;

use crate::secure::ChannelError;

/// Errors surfaced by connection operations and delivered to completions.
///
/// Secure channel faults and codec faults are wrapped rather than flattened,
/// so callers can tell a protocol violation by the peer from a local misuse
/// (such as [`ChannelError::HandshakeNotComplete`]).
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The transport failed to deliver bytes
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Secure channel fault
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// WebSocket codec fault
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection has been closed; no further sends are accepted
    #[error("connection is closed")]
    Closed,

    /// A Close frame was already sent; no further frames may follow it
    #[error("close frame already sent, output is shut")]
    OutputClosed,

    /// The completion was dropped before anyone resolved it
    #[error("completion dropped before the operation finished")]
    CompletionDropped,

    /// The keep-alive timer needs a tokio runtime and none is running
    #[error("no tokio runtime available for the keep-alive timer")]
    NoRuntime,
}

impl ConnectionError {
    /// Whether the error reports misuse by the caller rather than a failure
    /// of the peer or the transport.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::Channel(ChannelError::HandshakeNotComplete) | Self::NoRuntime)
    }
}
