//! Connection configuration.
//!
//! Buffer sizes and timer intervals for the secure channel and the WebSocket
//! connection. Both types deserialize from any serde format, with every field
//! optional and falling back to [`Default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default size of the buffer that receives decrypted handshake output.
pub const DEFAULT_REQUEST_BUFFER_SIZE: usize = 8 * 1024;

/// Default size of the buffer each outgoing record is encrypted into.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Hard ceiling for any buffer the secure channel grows on overflow. An
/// engine asking for more is treated as a fault.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default interval between keep-alive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Buffer sizing for a [`SecureChannel`](crate::secure::SecureChannel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Initial capacity of the plaintext buffer used while handshaking
    pub request_buffer_size: usize,

    /// Initial capacity of each outgoing encrypted record buffer
    pub write_buffer_size: usize,

    /// Largest buffer the channel will allocate when the engine reports
    /// overflow
    pub max_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_buffer_size: DEFAULT_REQUEST_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Keep-alive settings for a
/// [`WebSocketConnection`](crate::websocket::WebSocketConnection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Interval between client keep-alive pings. `None` disables the timer.
    pub ping_interval: Option<Duration>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self { ping_interval: Some(DEFAULT_PING_INTERVAL) }
    }
}
