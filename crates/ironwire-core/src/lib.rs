//! ironwire connection core
//!
//! Orchestration between a raw byte-stream transport and two protocol
//! engines: a TLS-style secure channel and a WebSocket connection.
//!
//! # Architecture
//!
//! Neither engine owns a socket. Bytes come in through an upcall
//! ([`websocket::WebSocketConnection::on_bytes`] or
//! [`secure::SecureChannel::read`]) and leave through the
//! [`transport::Session`] trait, whose writes are non-blocking and report
//! their outcome through a [`completion::Completion`]. The cryptographic record
//! engine and the task runner are likewise traits, so the same state machines
//! run over rustls in production and over scripted engines in tests.
//!
//! ```text
//! transport ─> SecureChannel (optional) ─> Parser ─> WebSocketConnection ─> sink
//!     ^                                                     │
//!     └──────────── SecureChannel (optional) <─ Generator <─┘
//! ```
//!
//! # Components
//!
//! - [`secure`]: record engine abstraction and the secure channel state machine
//! - [`websocket`]: WebSocket connection, IOState, keep-alive
//! - [`completion`]: exactly-once completion callbacks and counting tracker
//! - [`events`]: ordered listener registries
//! - [`buffer`]: growable record buffers and merge policy
//! - [`transport`]: transport session abstraction
//! - [`mod@env`]: environment abstraction (time, RNG)
//! - [`config`]: buffer sizing and keep-alive configuration
//! - [`error`]: connection error types

pub mod buffer;
pub mod completion;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod secure;
pub mod transport;
pub mod websocket;

pub use completion::{Completion, CountingCompletion, HeldCompletion};
pub use config::{ChannelConfig, WebSocketConfig};
pub use env::{Environment, SystemEnv};
pub use error::ConnectionError;
pub use events::{ConnectionClosed, ConnectionException, HandshakeFinished, Listeners};
pub use secure::{ChannelError, RecordEngine, SecureChannel, TaskRunner};
pub use transport::Session;
pub use websocket::{IncomingFrames, IoState, WebSocketConnection};
