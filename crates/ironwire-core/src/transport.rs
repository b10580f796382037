//! Transport session abstraction.
//!
//! The engines never touch sockets. Outbound bytes go through a [`Session`],
//! inbound bytes are pushed in by whoever owns the socket. Production uses a
//! TCP session driven by tokio tasks; tests use an in-memory session that
//! records every write.

use bytes::Bytes;

use crate::completion::Completion;

/// A byte-stream connection to one peer.
///
/// `write` must not block: the bytes are queued and the completion resolves
/// once they were handed to the operating system or the write failed.
/// Writes are delivered in call order.
pub trait Session: Send + Sync + 'static {
    /// Identifier used in logs and events
    fn session_id(&self) -> u64;

    /// Queue `data` for delivery and report the outcome through `completion`.
    fn write(&self, data: Bytes, completion: Completion);

    /// Whether the session can still carry bytes
    fn is_open(&self) -> bool;

    /// Close the session. Idempotent.
    fn close(&self);
}
