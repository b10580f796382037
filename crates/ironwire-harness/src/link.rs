//! Explicit byte pumping between two endpoints.
//!
//! Nothing moves unless a test asks for it: each endpoint writes into its
//! own [`MemorySession`], and the pump functions drain one session into the
//! opposite endpoint. Tests decide chunking and ordering.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use ironwire_core::{
    ChannelConfig, ChannelError, ConnectionError, Environment, IncomingFrames, SecureChannel,
    WebSocketConfig, WebSocketConnection,
};
use ironwire_proto::{Frame, WebSocketPolicy};

use crate::{
    memory_session::MemorySession,
    sim_env::SimEnv,
    toy_engine::{EngineStats, ToyEngine, ToyEngineConfig},
};

/// Upper bound on pump rounds before a handshake is declared stuck.
const MAX_ROUNDS: usize = 16;

/// A client and a server channel over two memory sessions.
pub struct ChannelPair {
    /// Client-side channel
    pub client: SecureChannel,
    /// Server-side channel
    pub server: SecureChannel,
    /// Transport the client writes into
    pub client_session: Arc<MemorySession>,
    /// Transport the server writes into
    pub server_session: Arc<MemorySession>,
    /// Client engine counters
    pub client_stats: Arc<EngineStats>,
    /// Server engine counters
    pub server_stats: Arc<EngineStats>,
}

impl ChannelPair {
    /// Build both channels; the client's first flight is already written.
    pub fn new(engine: ToyEngineConfig, config: ChannelConfig) -> Result<Self, ChannelError> {
        Self::with_engines(ToyEngine::client(engine), ToyEngine::server(engine), config)
    }

    /// Build both channels from prepared engines.
    pub fn with_engines(
        client_engine: ToyEngine,
        server_engine: ToyEngine,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError> {
        let client_session = MemorySession::new(1);
        let server_session = MemorySession::new(2);
        let client_stats = client_engine.stats();
        let server_stats = server_engine.stats();

        let client = SecureChannel::builder(client_session.clone(), Box::new(client_engine))
            .config(config)
            .build()?;
        let server = SecureChannel::builder(server_session.clone(), Box::new(server_engine))
            .config(config)
            .build()?;

        Ok(Self { client, server, client_session, server_session, client_stats, server_stats })
    }

    /// Deliver everything the client wrote to the server, one write per read.
    pub fn client_to_server(&mut self) -> Result<Vec<Bytes>, ChannelError> {
        deliver(&self.client_session, &mut self.server)
    }

    /// Deliver everything the server wrote to the client, one write per read.
    pub fn server_to_client(&mut self) -> Result<Vec<Bytes>, ChannelError> {
        deliver(&self.server_session, &mut self.client)
    }

    /// Pump flights both ways until both handshakes finished.
    pub fn complete_handshake(&mut self) -> Result<(), ChannelError> {
        for _ in 0..MAX_ROUNDS {
            if self.client.is_handshake_finished() && self.server.is_handshake_finished() {
                return Ok(());
            }
            self.client_to_server()?;
            self.server_to_client()?;
        }
        if self.client.is_handshake_finished() && self.server.is_handshake_finished() {
            Ok(())
        } else {
            Err(ChannelError::HandshakeNotComplete)
        }
    }
}

/// Feed every recorded write of `from` into `to` and collect the plaintext.
pub fn deliver(from: &MemorySession, to: &mut SecureChannel) -> Result<Vec<Bytes>, ChannelError> {
    let mut plain = Vec::new();
    for chunk in from.take_written() {
        if let Some(bytes) = to.read(chunk)? {
            plain.push(bytes);
        }
    }
    Ok(plain)
}

/// Frame sink that records everything it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<Frame>>,
    errors: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// Empty sink, ready to attach
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drain received frames.
    pub fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.frames.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Errors received so far, rendered with `Display`
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl IncomingFrames for CollectingSink {
    fn incoming_frame(&self, frame: Frame) {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).push(frame);
    }

    fn incoming_error(&self, error: &ConnectionError) {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).push(error.to_string());
    }
}

/// A client and a server WebSocket connection over two memory sessions.
pub struct WebSocketPair<E: Environment = SimEnv> {
    /// Client connection (masks its frames, runs keep-alive)
    pub client: WebSocketConnection<E>,
    /// Server connection
    pub server: WebSocketConnection<E>,
    /// Transport the client writes into
    pub client_session: Arc<MemorySession>,
    /// Transport the server writes into
    pub server_session: Arc<MemorySession>,
    /// Frames delivered to the client application
    pub client_sink: Arc<CollectingSink>,
    /// Frames delivered to the server application
    pub server_sink: Arc<CollectingSink>,
}

impl WebSocketPair<SimEnv> {
    /// Plain (unencrypted) pair.
    ///
    /// The client keep-alive runs when `config.ping_interval` is set, which
    /// requires a tokio runtime.
    pub fn new(env: SimEnv, config: WebSocketConfig) -> Result<Self, ConnectionError> {
        let client_session = MemorySession::new(1);
        let server_session = MemorySession::new(2);
        Self::build(env, config, client_session, server_session, None, None)
    }

    /// Pair whose traffic runs through secure channels with finished
    /// handshakes.
    pub fn secure(
        env: SimEnv,
        config: WebSocketConfig,
        engine: ToyEngineConfig,
    ) -> Result<Self, ConnectionError> {
        let mut channels = ChannelPair::new(engine, ChannelConfig::default())?;
        channels.complete_handshake()?;
        Self::from_channels(env, config, channels)
    }

    /// Pair over `channels` as they are. If their handshake is still
    /// running, pumping the pair finishes it through
    /// [`WebSocketConnection::on_bytes`].
    pub fn from_channels(
        env: SimEnv,
        config: WebSocketConfig,
        channels: ChannelPair,
    ) -> Result<Self, ConnectionError> {
        Self::build(
            env,
            config,
            channels.client_session,
            channels.server_session,
            Some(channels.client),
            Some(channels.server),
        )
    }

    fn build(
        env: SimEnv,
        config: WebSocketConfig,
        client_session: Arc<MemorySession>,
        server_session: Arc<MemorySession>,
        client_channel: Option<SecureChannel>,
        server_channel: Option<SecureChannel>,
    ) -> Result<Self, ConnectionError> {
        let client_sink = CollectingSink::new();
        let server_sink = CollectingSink::new();

        let mut client = WebSocketConnection::builder(client_session.clone(), WebSocketPolicy::client())
            .env(env.clone())
            .config(config)
            .incoming(client_sink.clone());
        if let Some(channel) = client_channel {
            client = client.secure(channel);
        }

        let mut server = WebSocketConnection::builder(server_session.clone(), WebSocketPolicy::server())
            .env(env)
            .config(config)
            .incoming(server_sink.clone());
        if let Some(channel) = server_channel {
            server = server.secure(channel);
        }

        Ok(Self {
            client: client.build()?,
            server: server.build()?,
            client_session,
            server_session,
            client_sink,
            server_sink,
        })
    }
}

impl<E: Environment> WebSocketPair<E> {
    /// Deliver the client's writes to the server, one write per upcall.
    pub fn client_to_server(&self) -> usize {
        pump(&self.client_session, &self.server)
    }

    /// Deliver the server's writes to the client, one write per upcall.
    pub fn server_to_client(&self) -> usize {
        pump(&self.server_session, &self.client)
    }
}

/// Feed every recorded write of `from` into `to`; returns the chunk count.
pub fn pump<E: Environment>(from: &MemorySession, to: &WebSocketConnection<E>) -> usize {
    let chunks = from.take_written();
    let count = chunks.len();
    for chunk in chunks {
        to.on_bytes(chunk);
    }
    count
}
