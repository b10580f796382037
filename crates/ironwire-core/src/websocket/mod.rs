//! WebSocket connection engine.
//!
//! [`WebSocketConnection`] sits on a transport session, optionally wrapped by
//! a [`SecureChannel`](crate::secure::SecureChannel). It encodes outgoing
//! frames, answers Ping and Close frames itself, forwards every decoded frame
//! to an [`IncomingFrames`] sink, and runs the client keep-alive timer.

mod connection;
mod io_state;
mod upgrade;

pub use connection::{IncomingFrames, SendFuture, WebSocketConnection, WebSocketConnectionBuilder};
pub use io_state::{CloseInitiator, ConnectionState, IoState};
pub use upgrade::{UpgradeRequest, UpgradeResponse};
