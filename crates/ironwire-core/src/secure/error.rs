//! Secure channel error types.

use thiserror::Error;

use super::engine::{HandshakeStatus, Status};

/// Failure reported by a record engine implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine rejected the input or failed internally
    #[error("record engine failure: {0}")]
    Failure(String),

    /// The engine was already closed
    #[error("record engine is closed")]
    Closed,
}

/// Secure channel faults.
///
/// `Clone` so a single fault can be returned to the caller and delivered to
/// the write completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Application data was written before the handshake finished. Caller
    /// misuse, not a peer fault.
    #[error("the initial handshake is not complete")]
    HandshakeNotComplete,

    /// The engine returned a terminal status while handshaking
    #[error("handshake aborted: engine returned {status:?}")]
    HandshakeAborted {
        /// Status that ended the handshake
        status: Status,
    },

    /// The engine reported a handshake status the state machine cannot act on
    #[error("unexpected handshake status {0:?}")]
    UnexpectedHandshakeStatus(HandshakeStatus),

    /// Decoding inbound records failed; the channel must be closed
    #[error("record decode failed with status {status:?}")]
    Decode {
        /// Status returned by unwrap
        status: Status,
    },

    /// Encoding outbound records failed; the channel must be closed
    #[error("record encode failed with status {status:?}")]
    Encode {
        /// Status returned by wrap
        status: Status,
    },

    /// The engine asked for a buffer larger than the configured ceiling
    #[error("buffer of {requested} bytes exceeds the {limit} byte limit")]
    BufferLimitExceeded {
        /// Size the engine needed
        requested: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// The channel was closed
    #[error("secure channel is closed")]
    Closed,

    /// Reading the source of a streamed write failed
    #[error("write source failed: {0}")]
    Source(String),

    /// The engine itself failed
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ChannelError {
    /// Whether this fault reports caller misuse.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::HandshakeNotComplete)
    }
}
