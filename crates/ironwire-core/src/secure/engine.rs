//! Record engine abstraction.

use super::error::EngineError;

/// Outcome of a single wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The operation completed
    Ok,
    /// The destination buffer was too small for the output
    BufferOverflow,
    /// The source did not contain a complete record
    BufferUnderflow,
    /// The engine is closed in this direction
    Closed,
}

/// What the engine needs next to make handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStatus {
    /// Produce outbound handshake data with `wrap`
    NeedWrap,
    /// Consume inbound handshake data with `unwrap`
    NeedUnwrap,
    /// Run the pending delegated tasks before continuing
    NeedTask,
    /// The handshake has just completed
    Finished,
    /// No handshake is in progress
    NotHandshaking,
}

/// Result of a wrap or unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    /// Record status
    pub status: Status,
    /// Handshake status after the call
    pub handshake_status: HandshakeStatus,
    /// Bytes read from the source
    pub bytes_consumed: usize,
    /// Bytes written to the destination
    pub bytes_produced: usize,
}

impl EngineResult {
    /// Whether the call consumed or produced anything.
    pub fn made_progress(&self) -> bool {
        self.bytes_consumed > 0 || self.bytes_produced > 0
    }
}

/// Potentially expensive computation the engine defers to its caller.
pub type DelegatedTask = Box<dyn FnOnce() + Send>;

/// A TLS-style record engine.
///
/// Mirrors the wrap/unwrap model: `wrap` encrypts plaintext (or produces
/// handshake flights from an empty source) into records, `unwrap` decrypts
/// records into plaintext. Both write into the caller's slice and report how
/// much they consumed and produced; they never allocate output themselves.
pub trait RecordEngine: Send {
    /// Start the initial handshake.
    fn begin_handshake(&mut self) -> Result<(), EngineError>;

    /// Whether this engine initiates the handshake
    fn is_client_mode(&self) -> bool;

    /// Current handshake status
    fn handshake_status(&self) -> HandshakeStatus;

    /// Encrypt from `src` into `dst`.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Decrypt from `src` into `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError>;

    /// Next pending delegated task, if any.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Signal that no more inbound records will arrive.
    fn close_inbound(&mut self);

    /// Start closing the outbound side. The next `wrap` produces the
    /// close-notify record, if the protocol has one. Idempotent.
    fn close_outbound(&mut self);

    /// Largest plaintext a single record can decrypt to
    fn application_buffer_size(&self) -> usize;

    /// Largest encrypted record the engine can produce
    fn packet_buffer_size(&self) -> usize;

    /// Application protocol agreed through ALPN, once the handshake settled
    /// it. Engines without protocol negotiation return `None`.
    fn negotiated_protocol(&self) -> Option<&[u8]> {
        None
    }
}
