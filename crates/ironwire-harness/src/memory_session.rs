//! In-memory transport session.

use std::{
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use ironwire_core::{Completion, ConnectionError, Session};

/// How [`MemorySession`] resolves write completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Every write succeeds immediately
    Succeed,
    /// The first `n` writes succeed, later ones fail with a broken pipe
    FailAfter(usize),
    /// Completions are held until [`MemorySession::complete_pending`] or
    /// [`MemorySession::fail_pending`]
    Defer,
}

#[derive(Debug)]
struct State {
    mode: WriteMode,
    written: Vec<Bytes>,
    accepted: usize,
    pending: Vec<Completion>,
}

/// Transport that records every write.
///
/// Writes on a closed session fail with `NotConnected` and are not recorded.
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    open: AtomicBool,
    closes: AtomicUsize,
    state: Mutex<State>,
}

impl MemorySession {
    /// Open session whose writes succeed.
    pub fn new(id: u64) -> Arc<Self> {
        Self::with_mode(id, WriteMode::Succeed)
    }

    /// Open session resolving writes according to `mode`.
    pub fn with_mode(id: u64, mode: WriteMode) -> Arc<Self> {
        Arc::new(Self {
            id,
            open: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            state: Mutex::new(State { mode, written: Vec::new(), accepted: 0, pending: Vec::new() }),
        })
    }

    /// Change how later writes are resolved.
    pub fn set_mode(&self, mode: WriteMode) {
        self.lock().mode = mode;
    }

    /// Open or close the session without counting a `close` call.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    /// Drain the recorded writes, one entry per write call.
    pub fn take_written(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().written)
    }

    /// Drain the recorded writes as one contiguous buffer.
    pub fn take_bytes(&self) -> Bytes {
        let chunks = self.take_written();
        let mut all = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in chunks {
            all.extend_from_slice(&chunk);
        }
        all.freeze()
    }

    /// Number of recorded writes not yet drained
    pub fn buffered_writes(&self) -> usize {
        self.lock().written.len()
    }

    /// Writes accepted since creation
    pub fn accepted_writes(&self) -> usize {
        self.lock().accepted
    }

    /// How often `close` was called
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    /// Completions held in [`WriteMode::Defer`]
    pub fn pending_completions(&self) -> usize {
        self.lock().pending.len()
    }

    /// Resolve every held completion successfully, in write order.
    pub fn complete_pending(&self) {
        let pending = std::mem::take(&mut self.lock().pending);
        for completion in pending {
            completion.succeeded();
        }
    }

    /// Fail the held completion at `index` and succeed the others.
    pub fn fail_pending(&self, index: usize) {
        let pending = std::mem::take(&mut self.lock().pending);
        for (i, completion) in pending.into_iter().enumerate() {
            if i == index {
                completion.failed(broken_pipe());
            } else {
                completion.succeeded();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Session for MemorySession {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn write(&self, data: Bytes, completion: Completion) {
        if !self.is_open() {
            completion.failed(ConnectionError::Io(io::Error::from(io::ErrorKind::NotConnected)));
            return;
        }

        let result = {
            let mut state = self.lock();
            match state.mode {
                WriteMode::FailAfter(n) if state.accepted >= n => Err(broken_pipe()),
                WriteMode::Succeed | WriteMode::FailAfter(_) => {
                    state.accepted += 1;
                    state.written.push(data);
                    Ok(())
                },
                WriteMode::Defer => {
                    state.accepted += 1;
                    state.written.push(data);
                    state.pending.push(completion);
                    return;
                },
            }
        };

        completion.complete(result);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
        self.open.store(false, Ordering::Release);
    }
}

fn broken_pipe() -> ConnectionError {
    ConnectionError::Io(io::Error::from(io::ErrorKind::BrokenPipe))
}
