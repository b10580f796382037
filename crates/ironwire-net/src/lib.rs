//! Production adapters for ironwire.
//!
//! [`TcpSession`] implements the core [`Session`](ironwire_core::Session)
//! trait over a tokio TCP stream, and [`TcpReader`] feeds the inbound side
//! into a connection. [`RustlsEngine`] drives a rustls connection through the
//! wrap/unwrap model the secure channel expects. [`pem`] loads certificates
//! and keys for it.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod pem;
mod read_size;
mod rustls_engine;
mod tcp;

pub use pem::{PemError, load_certs, load_private_key};
pub use read_size::AdaptiveReadSize;
pub use rustls_engine::RustlsEngine;
pub use tcp::{TcpReader, TcpSession};
