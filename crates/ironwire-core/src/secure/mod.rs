//! Secure channel engine.
//!
//! [`SecureChannel`] drives a [`RecordEngine`] through its handshake and then
//! converts between application bytes and encrypted records. The engine does
//! the cryptography; the channel owns the buffers, decides when to wrap or
//! unwrap, runs delegated tasks through a [`TaskRunner`], and hands finished
//! records to the transport [`Session`](crate::transport::Session).

mod channel;
mod engine;
mod error;
mod task;

pub use channel::{SecureChannel, SecureChannelBuilder};
pub use engine::{DelegatedTask, EngineResult, HandshakeStatus, RecordEngine, Status};
pub use error::{ChannelError, EngineError};
pub use task::{InlineTaskRunner, TaskRunner, ThreadedTaskRunner};
