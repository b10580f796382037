//! Secure channel state machine.
//!
//! # Handshake
//!
//! The channel tracks the engine's handshake status and reacts to it:
//!
//! ```text
//!              ┌──────── NeedTask: run delegated tasks ────────┐
//!              v                                               │
//! NeedUnwrap ──unwrap until underflow──> NeedWrap ──wrap flights──> NeedUnwrap ...
//!     │                                      │
//!     └──────────────── Finished <───────────┘
//! ```
//!
//! Inbound ciphertext that does not form a whole record is kept and merged
//! with the next read. Handshake flights are written to the transport as
//! soon as the engine produces them.
//!
//! # Buffers
//!
//! `inbound_cipher` holds undecoded ciphertext; `inbound_plain` holds
//! decrypted bytes not yet returned. Both grow on engine overflow up to
//! [`ChannelConfig::max_buffer_size`]; a larger demand fails the read with
//! [`ChannelError::BufferLimitExceeded`].
//!
//! # Listeners
//!
//! Handshake-finished listeners normally run inside the call that completed
//! the handshake. An owner that keeps the channel behind a lock can switch to
//! held notifications and deliver them itself once the lock is released.

use std::{
    io::{self, Read, Seek, SeekFrom},
    mem,
    sync::Arc,
};

use bytes::{Buf, Bytes};
use tracing::{debug, info, warn};

use super::{
    engine::{HandshakeStatus, RecordEngine, Status},
    error::ChannelError,
    task::{InlineTaskRunner, TaskRunner},
};
use crate::{
    buffer::{RecordBuffer, merge},
    completion::{Completion, CountingCompletion},
    config::ChannelConfig,
    error::ConnectionError,
    events::{HandshakeFinished, ListenerResult, Listeners},
    transport::Session,
};

/// Encrypting wrapper around a transport session.
///
/// Created through [`SecureChannel::builder`]; the handshake starts while
/// building. All methods take `&mut self`: a channel has a single owner that
/// serializes inbound delivery and outbound calls.
pub struct SecureChannel {
    session: Arc<dyn Session>,
    engine: Box<dyn RecordEngine>,
    task_runner: Arc<dyn TaskRunner>,
    config: ChannelConfig,
    handshake_listeners: Arc<Listeners<HandshakeFinished>>,
    hold_notifications: bool,
    held_notification: Option<HandshakeFinished>,

    inbound_cipher: Bytes,
    inbound_plain: RecordBuffer,

    handshake_status: HandshakeStatus,
    handshake_complete: bool,
    closed: bool,
}

/// Builder for [`SecureChannel`].
pub struct SecureChannelBuilder {
    session: Arc<dyn Session>,
    engine: Box<dyn RecordEngine>,
    task_runner: Arc<dyn TaskRunner>,
    config: ChannelConfig,
    handshake_listeners: Listeners<HandshakeFinished>,
}

impl SecureChannelBuilder {
    /// Buffer sizing
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Where delegated engine tasks run. Defaults to [`InlineTaskRunner`].
    pub fn task_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.task_runner = runner;
        self
    }

    /// Register a handshake-finished listener before the handshake starts.
    ///
    /// Listeners registered here also observe handshakes that complete while
    /// building, e.g. abbreviated handshakes on a client.
    pub fn on_handshake_finished<F>(self, listener: F) -> Self
    where
        F: Fn(&HandshakeFinished) -> ListenerResult + Send + Sync + 'static,
    {
        self.handshake_listeners.register(listener);
        self
    }

    /// Begin the handshake and return the channel.
    ///
    /// A client-mode engine produces its first flight here, and that flight is
    /// written to the session before `build` returns.
    pub fn build(self) -> Result<SecureChannel, ChannelError> {
        let mut engine = self.engine;
        engine.begin_handshake()?;
        let handshake_status = engine.handshake_status();

        let request_buffer_size = self.config.request_buffer_size;
        let mut channel = SecureChannel {
            session: self.session,
            engine,
            task_runner: self.task_runner,
            config: self.config,
            handshake_listeners: Arc::new(self.handshake_listeners),
            hold_notifications: false,
            held_notification: None,
            inbound_cipher: Bytes::new(),
            inbound_plain: RecordBuffer::with_capacity(request_buffer_size),
            handshake_status,
            handshake_complete: false,
            closed: false,
        };

        debug!(
            session_id = channel.session_id(),
            client = channel.engine.is_client_mode(),
            status = ?handshake_status,
            "secure channel created"
        );

        if channel.engine.is_client_mode() {
            channel.handshake_wrap()?;
        }
        Ok(channel)
    }
}

impl SecureChannel {
    /// Start building a channel over `session` driven by `engine`.
    pub fn builder(
        session: Arc<dyn Session>,
        engine: Box<dyn RecordEngine>,
    ) -> SecureChannelBuilder {
        SecureChannelBuilder {
            session,
            engine,
            task_runner: Arc::new(InlineTaskRunner),
            config: ChannelConfig::default(),
            handshake_listeners: Listeners::new(),
        }
    }

    /// Session identifier of the underlying transport
    pub fn session_id(&self) -> u64 {
        self.session.session_id()
    }

    /// Whether `close` has not been called yet
    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Whether the initial handshake completed
    pub fn is_handshake_finished(&self) -> bool {
        self.handshake_complete
    }

    /// Last handshake status observed from the engine
    pub fn handshake_status(&self) -> HandshakeStatus {
        self.handshake_status
    }

    /// Application protocol agreed through ALPN, if the engine negotiated
    /// one.
    pub fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.engine.negotiated_protocol()
    }

    /// Register a handshake-finished listener.
    pub fn on_handshake_finished<F>(&self, listener: F)
    where
        F: Fn(&HandshakeFinished) -> ListenerResult + Send + Sync + 'static,
    {
        self.handshake_listeners.register(listener);
    }

    /// Keep handshake-finished events instead of notifying listeners from
    /// inside `read`. Collect them with `take_held_notification`.
    pub(crate) fn hold_notifications(&mut self) {
        self.hold_notifications = true;
    }

    /// Event held back since the last call, bundled with the listeners it is
    /// for.
    pub(crate) fn take_held_notification(&mut self) -> Option<HeldNotification> {
        self.held_notification.take().map(|event| HeldNotification {
            listeners: Arc::clone(&self.handshake_listeners),
            event,
        })
    }

    /// Feed inbound ciphertext and return any plaintext it completes.
    ///
    /// Drives the handshake while it is incomplete; bytes left over after the
    /// handshake finished are decoded in the same call. `Ok(None)` means more
    /// input is needed, not end of stream.
    pub fn read(&mut self, incoming: Bytes) -> Result<Option<Bytes>, ChannelError> {
        self.inbound_cipher = merge(mem::take(&mut self.inbound_cipher), incoming);

        if !self.handshake_complete && !self.drive_handshake()? {
            return Ok(None);
        }

        debug!(
            session_id = self.session_id(),
            buffered = self.inbound_cipher.len(),
            "secure channel read"
        );
        self.decode()
    }

    /// Encrypt `data` and write the records to the transport.
    ///
    /// Each record is flushed as soon as it is produced. `completion` fires
    /// once every record write completed, or with the first failure. It is
    /// also resolved when this call fails, with the returned error.
    ///
    /// Returns the number of plaintext bytes consumed.
    pub fn write(&mut self, data: &[u8], completion: Completion) -> Result<usize, ChannelError> {
        let tracker = CountingCompletion::new(completion, 1);
        let result = self.write_records(data, &tracker);
        match &result {
            Ok(_) => tracker.release(),
            Err(error) => tracker.fail(ConnectionError::Channel(error.clone())),
        }
        result
    }

    /// Write several plaintext chunks with one overall completion.
    ///
    /// `completion` succeeds after the writes of every chunk completed and
    /// fails exactly once if any of them fails.
    pub fn write_batch<B: AsRef<[u8]>>(
        &mut self,
        chunks: &[B],
        completion: Completion,
    ) -> Result<usize, ChannelError> {
        let tracker = CountingCompletion::new(completion, chunks.len());
        let mut written = 0;
        for chunk in chunks {
            written += self.write(chunk.as_ref(), tracker.part())?;
        }
        Ok(written)
    }

    /// Stream everything `reader` yields, `chunk_size` bytes at a time.
    ///
    /// Each chunk is encrypted and written as soon as it is read, so the
    /// source is never held in memory whole. `completion` fires once after
    /// the last record write, or with the first failure. A read error stops
    /// the stream with [`ChannelError::Source`]; records already written stay
    /// written.
    ///
    /// Returns the number of plaintext bytes consumed.
    pub fn write_reader<R: Read>(
        &mut self,
        mut reader: R,
        chunk_size: usize,
        completion: Completion,
    ) -> Result<usize, ChannelError> {
        let tracker = CountingCompletion::new(completion, 1);
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut written = 0;

        let result = loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break Ok(written),
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => break Err(ChannelError::Source(error.to_string())),
            };
            match self.write_records(&chunk[..read], &tracker) {
                Ok(consumed) => written += consumed,
                Err(error) => break Err(error),
            }
        };

        debug!(session_id = self.session_id(), written, ok = result.is_ok(), "streamed write");
        match &result {
            Ok(_) => tracker.release(),
            Err(error) => tracker.fail(ConnectionError::Channel(error.clone())),
        }
        result
    }

    /// Stream `length` bytes of `source` starting at `position`.
    ///
    /// Resolves like [`write_reader`](Self::write_reader). A source shorter
    /// than the region ends the stream early; the return value tells how
    /// much was sent.
    pub fn write_region<R: Read + Seek>(
        &mut self,
        mut source: R,
        position: u64,
        length: u64,
        chunk_size: usize,
        completion: Completion,
    ) -> Result<usize, ChannelError> {
        if let Err(error) = source.seek(SeekFrom::Start(position)) {
            let error = ChannelError::Source(error.to_string());
            completion.failed(ConnectionError::Channel(error.clone()));
            return Err(error);
        }
        self.write_reader(source.take(length), chunk_size, completion)
    }

    /// Close the outbound side and flush the close-notify record.
    ///
    /// Idempotent. The flush is best-effort: failures are logged.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.engine.close_outbound();
        debug!(session_id = self.session_id(), "secure channel closed");

        if self.session.is_open() {
            self.flush_close_notify();
        }
    }

    /// Returns whether the handshake is complete. `Ok(false)` means it is
    /// waiting for more input or the transport closed underneath it.
    fn drive_handshake(&mut self) -> Result<bool, ChannelError> {
        if !self.session.is_open() {
            debug!(session_id = self.session_id(), "transport closed during handshake");
            self.engine.close_inbound();
            return Ok(false);
        }

        loop {
            match self.handshake_status {
                HandshakeStatus::Finished => {
                    self.finish_handshake();
                    return Ok(true);
                },
                HandshakeStatus::NeedUnwrap => {
                    self.handshake_unwrap()?;
                    if self.handshake_complete {
                        return Ok(true);
                    }
                    if self.handshake_status != HandshakeStatus::NeedWrap {
                        // Underflow: wait for the rest of the peer's flight.
                        return Ok(false);
                    }
                },
                HandshakeStatus::NeedWrap => {
                    self.handshake_wrap()?;
                    if self.handshake_complete {
                        return Ok(true);
                    }
                    if self.handshake_status == HandshakeStatus::NeedUnwrap
                        && self.inbound_cipher.is_empty()
                    {
                        return Ok(false);
                    }
                },
                HandshakeStatus::NeedTask => {
                    let status = self.run_delegated_tasks();
                    if status == HandshakeStatus::NeedTask {
                        return Err(ChannelError::UnexpectedHandshakeStatus(status));
                    }
                    self.handshake_status = status;
                },
                HandshakeStatus::NotHandshaking => {
                    return Err(ChannelError::UnexpectedHandshakeStatus(self.handshake_status));
                },
            }
        }
    }

    fn handshake_unwrap(&mut self) -> Result<(), ChannelError> {
        while self.handshake_status == HandshakeStatus::NeedUnwrap {
            let result = self.engine.unwrap(&self.inbound_cipher, self.inbound_plain.spare_mut())?;
            self.inbound_cipher.advance(result.bytes_consumed);
            self.inbound_plain.advance(result.bytes_produced);
            self.handshake_status = result.handshake_status;

            debug!(
                session_id = self.session_id(),
                status = ?result.status,
                handshake = ?result.handshake_status,
                consumed = result.bytes_consumed,
                "handshake unwrap"
            );

            match result.status {
                Status::Ok => match result.handshake_status {
                    HandshakeStatus::NotHandshaking => {
                        return Err(ChannelError::UnexpectedHandshakeStatus(
                            HandshakeStatus::NotHandshaking,
                        ));
                    },
                    HandshakeStatus::NeedTask => {
                        self.handshake_status = self.run_delegated_tasks();
                    },
                    HandshakeStatus::Finished => {
                        self.finish_handshake();
                        return Ok(());
                    },
                    HandshakeStatus::NeedUnwrap if !result.made_progress() => return Ok(()),
                    HandshakeStatus::NeedUnwrap | HandshakeStatus::NeedWrap => {},
                },
                Status::BufferUnderflow => return Ok(()),
                Status::BufferOverflow => self.grow_plain()?,
                Status::Closed => return Err(ChannelError::HandshakeAborted { status: result.status }),
            }
        }
        Ok(())
    }

    fn handshake_wrap(&mut self) -> Result<(), ChannelError> {
        while self.handshake_status == HandshakeStatus::NeedWrap {
            let mut out = RecordBuffer::with_capacity(self.engine.packet_buffer_size());
            loop {
                let result = self.engine.wrap(&[], out.spare_mut())?;
                out.advance(result.bytes_produced);
                self.handshake_status = result.handshake_status;

                debug!(
                    session_id = self.session_id(),
                    status = ?result.status,
                    handshake = ?result.handshake_status,
                    produced = result.bytes_produced,
                    "handshake wrap"
                );

                match result.status {
                    Status::Ok => {
                        if self.handshake_status == HandshakeStatus::NeedTask {
                            self.handshake_status = self.run_delegated_tasks();
                        }
                        if out.is_empty() {
                            if self.handshake_status == HandshakeStatus::NeedWrap {
                                return Err(ChannelError::UnexpectedHandshakeStatus(
                                    HandshakeStatus::NeedWrap,
                                ));
                            }
                        } else {
                            self.flush_handshake(out.freeze());
                        }
                        break;
                    },
                    Status::BufferOverflow => self.grow_record(&mut out)?,
                    Status::BufferUnderflow | Status::Closed => {
                        return Err(ChannelError::HandshakeAborted { status: result.status });
                    },
                }
            }
        }

        if self.handshake_status == HandshakeStatus::Finished {
            self.finish_handshake();
        }
        Ok(())
    }

    fn decode(&mut self) -> Result<Option<Bytes>, ChannelError> {
        if self.inbound_cipher.is_empty() {
            return Ok(self.take_plain());
        }

        loop {
            let result = self.engine.unwrap(&self.inbound_cipher, self.inbound_plain.spare_mut())?;
            self.inbound_cipher.advance(result.bytes_consumed);
            self.inbound_plain.advance(result.bytes_produced);

            match result.status {
                Status::BufferOverflow => self.grow_plain()?,
                // Plaintext already decoded in this call is returned; the
                // partial record stays buffered.
                Status::BufferUnderflow => return Ok(self.take_plain()),
                Status::Ok => {
                    if result.handshake_status == HandshakeStatus::NeedTask {
                        self.run_delegated_tasks();
                    }
                    if self.inbound_cipher.is_empty() || !result.made_progress() {
                        return Ok(self.take_plain());
                    }
                },
                Status::Closed => return Err(ChannelError::Decode { status: result.status }),
            }
        }
    }

    fn write_records(
        &mut self,
        data: &[u8],
        tracker: &CountingCompletion,
    ) -> Result<usize, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if !self.handshake_complete {
            return Err(ChannelError::HandshakeNotComplete);
        }

        let mut consumed = 0;
        while consumed < data.len() {
            let mut out = RecordBuffer::with_capacity(self.config.write_buffer_size);
            loop {
                let result = self.engine.wrap(&data[consumed..], out.spare_mut())?;
                consumed += result.bytes_consumed;
                out.advance(result.bytes_produced);

                match result.status {
                    Status::Ok => {
                        if result.handshake_status == HandshakeStatus::NeedTask {
                            self.run_delegated_tasks();
                        }
                        if out.is_empty() {
                            return Err(ChannelError::Encode { status: result.status });
                        }
                        debug!(
                            session_id = self.session_id(),
                            record = out.len(),
                            consumed,
                            "secure channel write"
                        );
                        self.session.write(out.freeze(), tracker.add_part());
                        break;
                    },
                    Status::BufferOverflow => self.grow_record(&mut out)?,
                    Status::BufferUnderflow | Status::Closed => {
                        return Err(ChannelError::Encode { status: result.status });
                    },
                }
            }
        }
        Ok(consumed)
    }

    /// Run pending delegated tasks until the engine has none left, then
    /// report the engine's handshake status.
    fn run_delegated_tasks(&mut self) -> HandshakeStatus {
        loop {
            let tasks: Vec<_> = std::iter::from_fn(|| self.engine.delegated_task()).collect();
            if tasks.is_empty() {
                break;
            }
            debug!(session_id = self.session_id(), count = tasks.len(), "running delegated tasks");
            self.task_runner.run(tasks);
        }
        self.engine.handshake_status()
    }

    fn finish_handshake(&mut self) {
        self.handshake_status = HandshakeStatus::Finished;
        if self.handshake_complete {
            return;
        }
        self.handshake_complete = true;

        let session_id = self.session_id();
        info!(
            session_id,
            protocol = ?self.engine.negotiated_protocol().map(String::from_utf8_lossy),
            "handshake finished"
        );
        let event = HandshakeFinished { session_id };
        if self.hold_notifications {
            self.held_notification = Some(event);
        } else {
            self.handshake_listeners.notify(&event);
        }
    }

    fn flush_handshake(&self, record: Bytes) {
        let session_id = self.session_id();
        self.session.write(
            record,
            Completion::new(move |result| {
                if let Err(error) = result {
                    warn!(session_id, %error, "handshake flight write failed");
                }
            }),
        );
    }

    fn flush_close_notify(&mut self) {
        let session_id = self.session_id();
        let mut out = RecordBuffer::with_capacity(self.engine.packet_buffer_size());
        match self.engine.wrap(&[], out.spare_mut()) {
            Ok(result)
                if result.bytes_produced > 0
                    && matches!(result.status, Status::Ok | Status::Closed) =>
            {
                out.advance(result.bytes_produced);
                self.session.write(
                    out.freeze(),
                    Completion::new(move |result| {
                        if let Err(error) = result {
                            debug!(session_id, %error, "close-notify write failed");
                        }
                    }),
                );
            },
            Ok(_) => {},
            Err(error) => debug!(session_id, %error, "close-notify not produced"),
        }
    }

    fn take_plain(&mut self) -> Option<Bytes> {
        if self.inbound_plain.is_empty() {
            return None;
        }
        Some(self.inbound_plain.take(self.config.request_buffer_size))
    }

    /// Grow the plaintext buffer to the engine's application size plus what
    /// is already decoded.
    fn grow_plain(&mut self) -> Result<(), ChannelError> {
        let target = grow_target(
            self.inbound_plain.capacity(),
            self.inbound_plain.len(),
            self.engine.application_buffer_size(),
        );
        self.check_limit(target)?;
        debug!(session_id = self.session_id(), capacity = target, "growing plaintext buffer");
        self.inbound_plain.ensure_capacity(target);
        Ok(())
    }

    /// Grow an outgoing record buffer by the engine's packet size.
    fn grow_record(&self, out: &mut RecordBuffer) -> Result<(), ChannelError> {
        let target =
            grow_target(out.capacity(), out.len(), self.engine.packet_buffer_size());
        self.check_limit(target)?;
        debug!(session_id = self.session_id(), capacity = target, "growing record buffer");
        out.ensure_capacity(target);
        Ok(())
    }

    fn check_limit(&self, requested: usize) -> Result<(), ChannelError> {
        let limit = self.config.max_buffer_size;
        if requested > limit {
            warn!(session_id = self.session_id(), requested, limit, "buffer limit exceeded");
            return Err(ChannelError::BufferLimitExceeded { requested, limit });
        }
        Ok(())
    }
}

/// Handshake-finished event waiting to be delivered outside the channel's
/// lock.
pub(crate) struct HeldNotification {
    listeners: Arc<Listeners<HandshakeFinished>>,
    event: HandshakeFinished,
}

impl HeldNotification {
    pub(crate) fn deliver(self) {
        self.listeners.notify(&self.event);
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("session_id", &self.session_id())
            .field("handshake_status", &self.handshake_status)
            .field("handshake_complete", &self.handshake_complete)
            .field("closed", &self.closed)
            .field("buffered_cipher", &self.inbound_cipher.len())
            .field("buffered_plain", &self.inbound_plain.len())
            .finish_non_exhaustive()
    }
}

/// New capacity after an overflow: `written + hint`, or `capacity + hint`
/// when that would not grow the buffer.
fn grow_target(capacity: usize, written: usize, hint: usize) -> usize {
    let hint = hint.max(1);
    let target = written + hint;
    if target > capacity { target } else { capacity + hint }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_target_always_grows() {
        assert_eq!(grow_target(8, 0, 16), 16);
        assert_eq!(grow_target(8, 4, 16), 20);
        assert_eq!(grow_target(32, 4, 16), 48);
        assert_eq!(grow_target(8, 8, 0), 9);
    }
}
