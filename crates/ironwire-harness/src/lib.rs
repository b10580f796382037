//! Deterministic test harness for ironwire.
//!
//! In-memory implementations of the seams the connection engines depend on:
//! a recording transport [`MemorySession`], a scripted record engine
//! [`ToyEngine`], and a seeded [`SimEnv`]. [`link`] wires pairs of channels
//! and connections together so scenario tests can move bytes between two
//! endpoints explicitly, one chunk at a time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod link;
pub mod memory_session;
pub mod sim_env;
pub mod toy_engine;

pub use link::{ChannelPair, CollectingSink, WebSocketPair};
pub use memory_session::{MemorySession, WriteMode};
pub use sim_env::SimEnv;
pub use toy_engine::{EngineStats, ToyEngine, ToyEngineConfig};
