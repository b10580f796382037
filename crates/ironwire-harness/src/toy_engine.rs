//! Scripted record engine.
//!
//! A deterministic stand-in for a TLS engine with the same buffer contract:
//! one record per call, underflow on partial records, overflow when the
//! destination is too small, delegated tasks during the handshake.
//!
//! # Record format
//!
//! ```text
//! ┌──────┬──────────┬──────────────────────┐
//! │ type │ len (BE) │ payload ^ key        │
//! │ u8   │ u16      │ len bytes            │
//! └──────┴──────────┴──────────────────────┘
//! ```
//!
//! # Handshake script
//!
//! ```text
//! client                                  server
//!   HELLO            ────────────>          (delegated tasks)
//!                    <────────────        HELLO(client_auth), [CERT_REQUEST]
//!   [CERT], FINISHED ────────────>
//!                    <────────────        FINISHED
//! ```
//!
//! The server finishes on the wrap of its FINISHED record, the client on the
//! unwrap of it. In abbreviated mode the client finishes on its first wrap
//! without producing bytes and the server reports `Finished` right after
//! `begin_handshake`.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use ironwire_core::secure::{
    DelegatedTask, EngineError, EngineResult, HandshakeStatus, RecordEngine, Status,
};

const HELLO: u8 = 1;
const CERT_REQUEST: u8 = 2;
const CERT: u8 = 3;
const FINISHED: u8 = 4;
const CLOSE: u8 = 21;
const DATA: u8 = 23;

/// Record header length
pub const HEADER_LEN: usize = 3;

/// Behaviour knobs for [`ToyEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToyEngineConfig {
    /// Largest plaintext carried by one DATA record
    pub record_capacity: usize,
    /// Server requests a client certificate (adds one flight each way)
    pub client_auth: bool,
    /// Skip the exchange entirely
    pub abbreviated: bool,
    /// Payload obfuscation key
    pub key: u8,
    /// Delegated tasks the server queues when it receives HELLO
    pub task_count: usize,
    /// Queue one delegated task for every DATA record unwrapped
    pub mid_stream_tasks: bool,
}

impl Default for ToyEngineConfig {
    fn default() -> Self {
        Self {
            record_capacity: 1024,
            client_auth: false,
            abbreviated: false,
            key: 0x5a,
            task_count: 0,
            mid_stream_tasks: false,
        }
    }
}

/// Counters shared between an engine and the test that owns it.
#[derive(Debug, Default)]
pub struct EngineStats {
    wraps: AtomicUsize,
    unwraps: AtomicUsize,
    tasks_run: AtomicUsize,
    records_out: AtomicUsize,
    inbound_closes: AtomicUsize,
    outbound_closes: AtomicUsize,
}

impl EngineStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::AcqRel);
    }

    /// `wrap` calls
    pub fn wraps(&self) -> usize {
        self.wraps.load(Ordering::Acquire)
    }

    /// `unwrap` calls
    pub fn unwraps(&self) -> usize {
        self.unwraps.load(Ordering::Acquire)
    }

    /// Delegated tasks that ran
    pub fn tasks_run(&self) -> usize {
        self.tasks_run.load(Ordering::Acquire)
    }

    /// Records produced, handshake and close records included
    pub fn records_out(&self) -> usize {
        self.records_out.load(Ordering::Acquire)
    }

    /// `close_inbound` calls
    pub fn inbound_closes(&self) -> usize {
        self.inbound_closes.load(Ordering::Acquire)
    }

    /// `close_outbound` calls
    pub fn outbound_closes(&self) -> usize {
        self.outbound_closes.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    // client
    SendHello,
    AwaitServerHello,
    AwaitCertRequest,
    SendClientFlight,
    AwaitServerFinished,
    // server
    AwaitHello,
    SendServerFlight,
    AwaitClientFlight,
    SendServerFinished,
    // both
    Finished,
    Done,
}

impl Phase {
    fn status(self) -> HandshakeStatus {
        match self {
            Self::SendHello | Self::SendClientFlight | Self::SendServerFlight | Self::SendServerFinished => {
                HandshakeStatus::NeedWrap
            },
            Self::AwaitServerHello
            | Self::AwaitCertRequest
            | Self::AwaitServerFinished
            | Self::AwaitHello
            | Self::AwaitClientFlight => HandshakeStatus::NeedUnwrap,
            Self::Finished => HandshakeStatus::Finished,
            Self::Idle | Self::Done => HandshakeStatus::NotHandshaking,
        }
    }
}

/// Deterministic [`RecordEngine`].
pub struct ToyEngine {
    client: bool,
    config: ToyEngineConfig,
    phase: Phase,
    outbox: VecDeque<u8>,
    tasks: VecDeque<DelegatedTask>,
    outstanding: Arc<AtomicUsize>,
    inbound_closed: bool,
    outbound_closed: bool,
    close_sent: bool,
    stats: Arc<EngineStats>,
}

impl ToyEngine {
    /// Client-mode engine.
    pub fn client(config: ToyEngineConfig) -> Self {
        Self::new(true, config)
    }

    /// Server-mode engine.
    pub fn server(config: ToyEngineConfig) -> Self {
        Self::new(false, config)
    }

    fn new(client: bool, config: ToyEngineConfig) -> Self {
        Self {
            client,
            config,
            phase: Phase::Idle,
            outbox: VecDeque::new(),
            tasks: VecDeque::new(),
            outstanding: Arc::new(AtomicUsize::new(0)),
            inbound_closed: false,
            outbound_closed: false,
            close_sent: false,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Counters for this engine
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    fn result(&self, status: Status, consumed: usize, produced: usize) -> EngineResult {
        EngineResult {
            status,
            handshake_status: self.handshake_status(),
            bytes_consumed: consumed,
            bytes_produced: produced,
        }
    }

    fn queue_tasks(&mut self, count: usize) {
        for _ in 0..count {
            let outstanding = Arc::clone(&self.outstanding);
            let stats = Arc::clone(&self.stats);
            outstanding.fetch_add(1, Ordering::AcqRel);
            self.tasks.push_back(Box::new(move || {
                EngineStats::bump(&stats.tasks_run);
                outstanding.fetch_sub(1, Ordering::AcqRel);
            }));
        }
    }

    /// Move on after the current handshake flight was written.
    fn advance_after_wrap(&mut self) {
        self.phase = match self.phase {
            Phase::SendHello => Phase::AwaitServerHello,
            Phase::SendClientFlight => Phase::AwaitServerFinished,
            Phase::SendServerFlight => Phase::AwaitClientFlight,
            Phase::SendServerFinished => Phase::Finished,
            other => other,
        };
    }

    fn write_record(&mut self, kind: u8, payload: &[u8], dst: &mut [u8]) -> Option<usize> {
        let len = HEADER_LEN + payload.len();
        if dst.len() < len {
            return None;
        }
        dst[0] = kind;
        dst[1..HEADER_LEN].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        for (out, byte) in dst[HEADER_LEN..len].iter_mut().zip(payload) {
            *out = byte ^ self.config.key;
        }
        EngineStats::bump(&self.stats.records_out);
        Some(len)
    }

    fn handshake_wrap(&mut self, dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        if self.config.abbreviated && self.phase == Phase::SendHello {
            self.phase = Phase::Done;
            return Ok(EngineResult {
                status: Status::Ok,
                handshake_status: HandshakeStatus::Finished,
                bytes_consumed: 0,
                bytes_produced: 0,
            });
        }

        if self.outbox.is_empty() {
            let flight: &[u8] = match self.phase {
                Phase::SendHello => &[HELLO],
                Phase::SendClientFlight if self.config.client_auth => &[CERT, FINISHED],
                Phase::SendClientFlight | Phase::SendServerFinished => &[FINISHED],
                Phase::SendServerFlight if self.config.client_auth => &[HELLO, CERT_REQUEST],
                Phase::SendServerFlight => &[HELLO],
                _ => return Err(EngineError::Failure(format!("wrap in phase {:?}", self.phase))),
            };
            self.outbox.extend(flight);
        }

        let Some(&kind) = self.outbox.front() else {
            return Err(EngineError::Failure("empty flight".to_string()));
        };
        let flag = [u8::from(self.config.client_auth)];
        let payload: &[u8] = if kind == HELLO && !self.client { &flag } else { &[] };
        let Some(produced) = self.write_record(kind, payload, dst) else {
            return Ok(self.result(Status::BufferOverflow, 0, 0));
        };
        self.outbox.pop_front();

        if self.outbox.is_empty() {
            self.advance_after_wrap();
            if self.phase == Phase::Finished {
                self.phase = Phase::Done;
                return Ok(EngineResult {
                    status: Status::Ok,
                    handshake_status: HandshakeStatus::Finished,
                    bytes_consumed: 0,
                    bytes_produced: produced,
                });
            }
        }
        Ok(self.result(Status::Ok, 0, produced))
    }

    fn handshake_unwrap(
        &mut self,
        kind: u8,
        payload: &[u8],
        consumed: usize,
    ) -> Result<EngineResult, EngineError> {
        let next = match (self.phase, kind) {
            (Phase::AwaitHello, HELLO) => {
                self.queue_tasks(self.config.task_count);
                Phase::SendServerFlight
            },
            (Phase::AwaitServerHello, HELLO) => {
                if payload.first().is_some_and(|&flag| (flag ^ self.config.key) == 1) {
                    Phase::AwaitCertRequest
                } else {
                    Phase::SendClientFlight
                }
            },
            (Phase::AwaitCertRequest, CERT_REQUEST) => {
                self.config.client_auth = true;
                Phase::SendClientFlight
            },
            (Phase::AwaitClientFlight, CERT) if self.config.client_auth => Phase::AwaitClientFlight,
            (Phase::AwaitClientFlight, FINISHED) => Phase::SendServerFinished,
            (Phase::AwaitServerFinished, FINISHED) => {
                self.phase = Phase::Done;
                return Ok(EngineResult {
                    status: Status::Ok,
                    handshake_status: HandshakeStatus::Finished,
                    bytes_consumed: consumed,
                    bytes_produced: 0,
                });
            },
            (phase, kind) => {
                return Err(EngineError::Failure(format!(
                    "unexpected record type {kind} in phase {phase:?}"
                )));
            },
        };
        self.phase = next;
        Ok(self.result(Status::Ok, consumed, 0))
    }
}

impl RecordEngine for ToyEngine {
    fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if self.phase != Phase::Idle {
            return Err(EngineError::Failure("handshake already started".to_string()));
        }
        self.phase = match (self.client, self.config.abbreviated) {
            (true, _) => Phase::SendHello,
            (false, true) => Phase::Finished,
            (false, false) => Phase::AwaitHello,
        };
        Ok(())
    }

    fn is_client_mode(&self) -> bool {
        self.client
    }

    fn handshake_status(&self) -> HandshakeStatus {
        if self.outstanding.load(Ordering::Acquire) > 0 {
            return HandshakeStatus::NeedTask;
        }
        self.phase.status()
    }

    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        EngineStats::bump(&self.stats.wraps);
        if self.phase == Phase::Finished {
            self.phase = Phase::Done;
        }

        if self.outbound_closed {
            if self.close_sent {
                return Ok(self.result(Status::Closed, 0, 0));
            }
            let Some(produced) = self.write_record(CLOSE, &[], dst) else {
                return Ok(self.result(Status::BufferOverflow, 0, 0));
            };
            self.close_sent = true;
            return Ok(self.result(Status::Closed, 0, produced));
        }

        if self.phase != Phase::Done {
            return self.handshake_wrap(dst);
        }

        let chunk = src.len().min(self.config.record_capacity);
        match self.write_record(DATA, &src[..chunk], dst) {
            Some(produced) => Ok(self.result(Status::Ok, chunk, produced)),
            None => Ok(self.result(Status::BufferOverflow, 0, 0)),
        }
    }

    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, EngineError> {
        EngineStats::bump(&self.stats.unwraps);
        if self.phase == Phase::Finished {
            self.phase = Phase::Done;
        }
        if self.inbound_closed {
            return Ok(self.result(Status::Closed, 0, 0));
        }
        if src.len() < HEADER_LEN {
            return Ok(self.result(Status::BufferUnderflow, 0, 0));
        }

        let kind = src[0];
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        let total = HEADER_LEN + len;
        if src.len() < total {
            return Ok(self.result(Status::BufferUnderflow, 0, 0));
        }
        let payload = &src[HEADER_LEN..total];

        match kind {
            CLOSE => {
                self.inbound_closed = true;
                Ok(self.result(Status::Closed, total, 0))
            },
            DATA if self.phase == Phase::Done => {
                if dst.len() < len {
                    return Ok(self.result(Status::BufferOverflow, 0, 0));
                }
                for (out, byte) in dst.iter_mut().zip(payload) {
                    *out = byte ^ self.config.key;
                }
                if self.config.mid_stream_tasks {
                    self.queue_tasks(1);
                }
                Ok(self.result(Status::Ok, total, len))
            },
            _ => self.handshake_unwrap(kind, payload, total),
        }
    }

    fn delegated_task(&mut self) -> Option<DelegatedTask> {
        self.tasks.pop_front()
    }

    fn close_inbound(&mut self) {
        EngineStats::bump(&self.stats.inbound_closes);
        self.inbound_closed = true;
    }

    fn close_outbound(&mut self) {
        EngineStats::bump(&self.stats.outbound_closes);
        self.outbound_closed = true;
    }

    fn application_buffer_size(&self) -> usize {
        self.config.record_capacity
    }

    fn packet_buffer_size(&self) -> usize {
        self.config.record_capacity + HEADER_LEN
    }
}
