//! WebSocket connection.
//!
//! # Outgoing frames
//!
//! Client frames get a fresh random mask, server frames are sent unmasked.
//! Each frame is encoded whole into one buffer and handed to the secure
//! channel (when present) or directly to the session. Sending a Close frame
//! records the local close and tears the connection down; nothing else can
//! be sent afterwards.
//!
//! # Incoming frames
//!
//! Control frames are handled before the sink sees them:
//!
//! - Ping: a Pong with the same application data is queued
//! - Close: the remote close is recorded, echoed if we had not sent a Close,
//!   and the connection is torn down
//! - Pong: logged
//!
//! Every frame is then forwarded to the sink, if one is attached.
//!
//! # Keep-alive
//!
//! Client connections ping the server every
//! [`WebSocketConfig::ping_interval`]. The timer task holds a weak reference
//! to the connection and is aborted on close.
//!
//! # Callbacks
//!
//! The secure channel sits behind a mutex. Write completions and
//! handshake-finished listeners that resolve during a channel call are held
//! until that mutex is released, so a callback may send on the same
//! connection.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use ironwire_proto::{
    Behavior, CloseInfo, Frame, FrameBody, Generator, MAX_HEADER_LENGTH, MaskKey, Parser,
    WebSocketPolicy,
};
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    io_state::IoState,
    upgrade::{UpgradeRequest, UpgradeResponse},
};
use crate::{
    completion::{Completion, HeldCompletion},
    config::WebSocketConfig,
    env::{Environment, SystemEnv},
    error::ConnectionError,
    events::{ConnectionClosed, ConnectionException, ListenerResult, Listeners},
    secure::{ChannelError, SecureChannel},
    transport::Session,
};

/// Receiver of decoded frames and read-side errors.
pub trait IncomingFrames: Send + Sync {
    /// A frame was decoded.
    fn incoming_frame(&self, frame: Frame);

    /// Decoding failed or the secure channel faulted.
    fn incoming_error(&self, error: &ConnectionError);
}

/// Outcome of [`WebSocketConnection::send_text`] or
/// [`WebSocketConnection::send_binary`].
///
/// The frame is already queued when this is created; dropping the future
/// does not cancel the send.
#[derive(Debug)]
#[must_use = "dropping the future discards the send outcome, not the send"]
pub struct SendFuture {
    outcome: oneshot::Receiver<Result<(), ConnectionError>>,
}

impl Future for SendFuture {
    type Output = Result<bool, ConnectionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(()))) => Poll::Ready(Ok(true)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(error)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ConnectionError::CompletionDropped)),
        }
    }
}

/// Handle to a WebSocket connection. Clones share the connection.
pub struct WebSocketConnection<E: Environment = SystemEnv> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for WebSocketConnection<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<E: Environment> {
    env: E,
    session: Arc<dyn Session>,
    secure: Option<Mutex<SecureChannel>>,
    policy: WebSocketPolicy,
    config: WebSocketConfig,
    generator: Generator,
    parser: Mutex<Parser>,
    io_state: Mutex<IoState>,
    sink: Mutex<Option<Arc<dyn IncomingFrames>>>,
    close_listeners: Listeners<ConnectionClosed>,
    exception_listeners: Listeners<ConnectionException>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    upgrade_request: Option<UpgradeRequest>,
    upgrade_response: Option<UpgradeResponse>,
}

/// Builder for [`WebSocketConnection`].
pub struct WebSocketConnectionBuilder<E: Environment = SystemEnv> {
    env: E,
    session: Arc<dyn Session>,
    policy: WebSocketPolicy,
    secure: Option<SecureChannel>,
    config: WebSocketConfig,
    sink: Option<Arc<dyn IncomingFrames>>,
    upgrade_request: Option<UpgradeRequest>,
    upgrade_response: Option<UpgradeResponse>,
}

impl<E: Environment> WebSocketConnectionBuilder<E> {
    /// Use a different environment for masks and timers.
    pub fn env<E2: Environment>(self, env: E2) -> WebSocketConnectionBuilder<E2> {
        WebSocketConnectionBuilder {
            env,
            session: self.session,
            policy: self.policy,
            secure: self.secure,
            config: self.config,
            sink: self.sink,
            upgrade_request: self.upgrade_request,
            upgrade_response: self.upgrade_response,
        }
    }

    /// Route bytes through `channel`. Its handshake should be finished
    /// before frames are sent.
    ///
    /// Handshake-finished listeners registered on `channel` run from
    /// [`on_bytes`](WebSocketConnection::on_bytes) after the channel is
    /// unlocked.
    pub fn secure(mut self, mut channel: SecureChannel) -> Self {
        channel.hold_notifications();
        self.secure = Some(channel);
        self
    }

    /// Keep-alive settings
    pub fn config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial frame sink
    pub fn incoming(mut self, sink: Arc<dyn IncomingFrames>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Upgrade exchange that produced this connection
    pub fn upgrade(mut self, request: UpgradeRequest, response: UpgradeResponse) -> Self {
        self.upgrade_request = Some(request);
        self.upgrade_response = Some(response);
        self
    }

    /// Open the connection.
    ///
    /// Client connections with a ping interval start their keep-alive timer
    /// here, which needs a running tokio runtime.
    pub fn build(self) -> Result<WebSocketConnection<E>, ConnectionError> {
        let keep_alive_interval = match self.policy.behavior {
            Behavior::Client => self.config.ping_interval,
            Behavior::Server => None,
        };
        let runtime = match keep_alive_interval {
            Some(_) => Some(Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?),
            None => None,
        };

        let mut io_state = IoState::new();
        io_state.on_opened();

        let inner = Arc::new(Inner {
            env: self.env,
            session: self.session,
            secure: self.secure.map(Mutex::new),
            parser: Mutex::new(Parser::new(self.policy.clone())),
            policy: self.policy,
            config: self.config,
            generator: Generator::new(),
            io_state: Mutex::new(io_state),
            sink: Mutex::new(self.sink),
            close_listeners: Listeners::new(),
            exception_listeners: Listeners::new(),
            keep_alive: Mutex::new(None),
            closed: AtomicBool::new(false),
            upgrade_request: self.upgrade_request,
            upgrade_response: self.upgrade_response,
        });

        if let (Some(runtime), Some(interval)) = (runtime, keep_alive_interval) {
            let task = runtime.spawn(keep_alive(Arc::downgrade(&inner), inner.env.clone(), interval));
            *lock(&inner.keep_alive) = Some(task);
        }

        debug!(
            session_id = inner.session.session_id(),
            behavior = ?inner.policy.behavior,
            encrypted = inner.secure.is_some(),
            "websocket connection opened"
        );
        Ok(WebSocketConnection { inner })
    }
}

impl WebSocketConnection<SystemEnv> {
    /// Start building a connection over `session`.
    pub fn builder(
        session: Arc<dyn Session>,
        policy: WebSocketPolicy,
    ) -> WebSocketConnectionBuilder<SystemEnv> {
        WebSocketConnectionBuilder {
            env: SystemEnv,
            session,
            policy,
            secure: None,
            config: WebSocketConfig::default(),
            sink: None,
            upgrade_request: None,
            upgrade_response: None,
        }
    }
}

impl<E: Environment> WebSocketConnection<E> {
    /// Send a text message.
    ///
    /// The frame is queued before this returns; the future resolves to
    /// `true` once the transport accepted it.
    pub fn send_text(&self, text: impl Into<String>) -> SendFuture {
        self.send(Frame::text(text))
    }

    /// Send a binary message. Resolves like [`send_text`](Self::send_text).
    pub fn send_binary(&self, data: impl Into<Bytes>) -> SendFuture {
        self.send(Frame::binary(data))
    }

    fn send(&self, frame: Frame) -> SendFuture {
        let (completion, outcome) = Completion::channel();
        self.inner.outgoing_frame(frame, completion);
        SendFuture { outcome }
    }

    /// Encode and send `frame`, reporting the outcome through `completion`.
    pub fn outgoing_frame(&self, frame: Frame, completion: Completion) {
        self.inner.outgoing_frame(frame, completion);
    }

    /// Handle a decoded frame. Upcall from the codec.
    pub fn incoming_frame(&self, frame: Frame) {
        self.inner.incoming_frame(frame);
    }

    /// Handle a read-side fault.
    ///
    /// The sink and exception listeners are told; codec faults are answered
    /// with a Close frame carrying the matching status code, anything else
    /// closes the connection directly.
    pub fn incoming_error(&self, error: ConnectionError) {
        self.inner.incoming_error(error);
    }

    /// Feed bytes received from the transport.
    pub fn on_bytes(&self, data: Bytes) {
        self.inner.on_bytes(data);
    }

    /// Tear the connection down. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Replace the frame sink. `None` drops subsequent frames.
    pub fn set_incoming_frames(&self, sink: Option<Arc<dyn IncomingFrames>>) {
        *lock(&self.inner.sink) = sink;
    }

    /// Register a connection-closed listener.
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&ConnectionClosed) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.close_listeners.register(listener);
    }

    /// Register a connection-exception listener.
    pub fn on_exception<F>(&self, listener: F)
    where
        F: Fn(&ConnectionException) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.exception_listeners.register(listener);
    }

    /// Snapshot of the lifecycle state
    pub fn io_state(&self) -> IoState {
        lock(&self.inner.io_state).clone()
    }

    /// Whether `close` has not run yet
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether traffic goes through a secure channel
    pub fn is_encrypted(&self) -> bool {
        self.inner.secure.is_some()
    }

    /// Whether the secure handshake finished. Always `true` when unencrypted.
    pub fn is_handshake_finished(&self) -> bool {
        self.inner.secure.as_ref().is_none_or(|secure| lock(secure).is_handshake_finished())
    }

    /// Codec policy
    pub fn policy(&self) -> &WebSocketPolicy {
        &self.inner.policy
    }

    /// Keep-alive settings
    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Transport session identifier
    pub fn session_id(&self) -> u64 {
        self.inner.session.session_id()
    }

    /// Fresh random masking key
    pub fn generate_mask(&self) -> MaskKey {
        self.inner.generate_mask()
    }

    /// Upgrade request this connection was created from
    pub fn upgrade_request(&self) -> Option<&UpgradeRequest> {
        self.inner.upgrade_request.as_ref()
    }

    /// Upgrade response this connection was created from
    pub fn upgrade_response(&self) -> Option<&UpgradeResponse> {
        self.inner.upgrade_response.as_ref()
    }
}

impl<E: Environment> std::fmt::Debug for WebSocketConnection<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("session_id", &self.session_id())
            .field("behavior", &self.inner.policy.behavior)
            .field("state", &self.io_state().state())
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl<E: Environment> Inner<E> {
    fn session_id(&self) -> u64 {
        self.session.session_id()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn generate_mask(&self) -> MaskKey {
        let mut mask = [0u8; 4];
        self.env.random_bytes(&mut mask);
        mask
    }

    fn sink(&self) -> Option<Arc<dyn IncomingFrames>> {
        lock(&self.sink).clone()
    }

    fn check_output(&self, frame: &Frame) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let io_state = lock(&self.io_state);
        if io_state.local_close().is_some() {
            return Err(ConnectionError::OutputClosed);
        }
        if io_state.remote_close().is_some() && !matches!(frame.body, FrameBody::Close(_)) {
            return Err(ConnectionError::OutputClosed);
        }
        Ok(())
    }

    fn outgoing_frame(&self, mut frame: Frame, completion: Completion) {
        if let Err(error) = self.check_output(&frame) {
            debug!(session_id = self.session_id(), opcode = ?frame.opcode(), %error, "frame rejected");
            completion.failed(error);
            return;
        }

        match self.policy.behavior {
            Behavior::Client => {
                if !frame.is_masked() {
                    frame.set_mask(self.generate_mask());
                }
            },
            Behavior::Server => frame.mask = None,
        }

        let mut buf = BytesMut::with_capacity(MAX_HEADER_LENGTH + frame.payload_len());
        if let Err(error) = self.generator.generate_whole_frame(&frame, &mut buf) {
            completion.failed(error.into());
            return;
        }

        let close_info = frame.close_info().cloned();
        if let Some(info) = &close_info {
            lock(&self.io_state).on_close_local(info.clone());
        }

        debug!(
            session_id = self.session_id(),
            opcode = ?frame.opcode(),
            len = buf.len(),
            "sending frame"
        );
        self.write_bytes(buf.freeze(), completion);

        if close_info.is_some() {
            self.close();
        }
    }

    fn write_bytes(&self, bytes: Bytes, completion: Completion) {
        let Some(secure) = &self.secure else {
            self.session.write(bytes, completion);
            return;
        };

        let (completion, gate) = HeldCompletion::hold(completion);
        let result = lock(secure).write(&bytes, completion);
        gate.release();
        match result {
            Ok(_) => {},
            Err(error @ (ChannelError::HandshakeNotComplete | ChannelError::Closed)) => {
                debug!(session_id = self.session_id(), %error, "secure write refused");
            },
            Err(error) => {
                warn!(session_id = self.session_id(), %error, "secure write failed");
                self.notify_exception(ConnectionError::Channel(error));
                self.close();
            },
        }
    }

    fn incoming_frame(&self, frame: Frame) {
        match &frame.body {
            FrameBody::Ping(payload) => {
                self.outgoing_frame(Frame::pong(payload.clone()), Completion::noop());
            },
            FrameBody::Close(info) => {
                let must_echo = {
                    let mut io_state = lock(&self.io_state);
                    let must_echo = io_state.local_close().is_none();
                    io_state.on_close_remote(info.clone());
                    must_echo
                };
                debug!(session_id = self.session_id(), code = info.code, "close frame received");
                if must_echo {
                    self.outgoing_frame(Frame::close(CloseInfo::new(info.code, None)), Completion::noop());
                }
                self.close();
            },
            FrameBody::Pong(_) => {
                info!(session_id = self.session_id(), "pong received");
            },
            FrameBody::Text(_) | FrameBody::Binary(_) => {},
        }

        if let Some(sink) = self.sink() {
            sink.incoming_frame(frame);
        }
    }

    fn incoming_error(&self, error: ConnectionError) {
        warn!(session_id = self.session_id(), %error, "incoming error");

        if let Some(sink) = self.sink() {
            sink.incoming_error(&error);
        }

        let close_code = match &error {
            ConnectionError::Protocol(fault) => Some(fault.close_code()),
            _ => None,
        };
        self.notify_exception(error);

        match close_code {
            Some(code) => {
                self.outgoing_frame(Frame::close(CloseInfo::new(code, None)), Completion::noop());
                self.close();
            },
            None => self.close(),
        }
    }

    fn on_bytes(&self, data: Bytes) {
        if self.is_closed() {
            debug!(session_id = self.session_id(), len = data.len(), "bytes after close dropped");
            return;
        }

        let plain = match &self.secure {
            Some(secure) => {
                let (result, notification) = {
                    let mut channel = lock(secure);
                    let result = channel.read(data);
                    (result, channel.take_held_notification())
                };
                if let Some(notification) = notification {
                    notification.deliver();
                }
                match result {
                    Ok(Some(plain)) => plain,
                    Ok(None) => return,
                    Err(error) => {
                        self.incoming_error(ConnectionError::Channel(error));
                        return;
                    },
                }
            },
            None => data,
        };

        let mut frames = Vec::new();
        let parsed = lock(&self.parser).parse(&plain, &mut frames);

        for frame in frames {
            self.incoming_frame(frame);
        }
        if let Err(error) = parsed {
            self.incoming_error(error.into());
        }
    }

    fn notify_exception(&self, error: ConnectionError) {
        self.exception_listeners
            .notify(&ConnectionException { session_id: self.session_id(), error });
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = lock(&self.keep_alive).take() {
            task.abort();
        }

        let close_info = {
            let mut io_state = lock(&self.io_state);
            io_state.on_disconnected();
            io_state.close_info().cloned()
        };

        if let Some(secure) = &self.secure {
            lock(secure).close();
        }
        self.session.close();

        let session_id = self.session_id();
        info!(session_id, code = close_info.as_ref().map(|info| info.code), "websocket connection closed");
        self.close_listeners.notify(&ConnectionClosed { session_id, close_info });
    }
}

/// Periodic Ping until the connection closes or is dropped.
async fn keep_alive<E: Environment>(connection: Weak<Inner<E>>, env: E, interval: Duration) {
    loop {
        env.sleep(interval).await;

        let Some(inner) = connection.upgrade() else {
            break;
        };
        if inner.is_closed() {
            break;
        }

        let session_id = inner.session_id();
        inner.outgoing_frame(
            Frame::ping(Bytes::new()),
            Completion::new(move |result| match result {
                Ok(()) => debug!(session_id, "keep-alive ping sent"),
                Err(error) => warn!(session_id, %error, "keep-alive ping failed"),
            }),
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
