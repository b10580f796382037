//! Codec policy.

use serde::{Deserialize, Serialize};

/// Which end of the connection this endpoint is.
///
/// Clients mask every frame they send and expect unmasked frames back;
/// servers do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behavior {
    /// Connection initiator
    Client,
    /// Connection acceptor
    Server,
}

/// Limits and role applied by the generator and parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketPolicy {
    /// Local role
    pub behavior: Behavior,
    /// Largest reassembled text message accepted
    pub max_text_message_size: usize,
    /// Largest reassembled binary message accepted
    pub max_binary_message_size: usize,
}

impl WebSocketPolicy {
    /// Default limits for the given role.
    pub fn new(behavior: Behavior) -> Self {
        Self { behavior, max_text_message_size: 64 * 1024, max_binary_message_size: 64 * 1024 }
    }

    /// Policy for the initiating side
    pub fn client() -> Self {
        Self::new(Behavior::Client)
    }

    /// Policy for the accepting side
    pub fn server() -> Self {
        Self::new(Behavior::Server)
    }

    /// Whether frames sent under this policy must be masked
    pub fn masks_outgoing(&self) -> bool {
        self.behavior == Behavior::Client
    }
}
