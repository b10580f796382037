//! Exactly-once completion callbacks.
//!
//! Every asynchronous send hands the transport a [`Completion`]. Consuming
//! methods make it impossible to resolve one twice, and dropping an
//! unresolved completion resolves it with
//! [`ConnectionError::CompletionDropped`], so a caller waiting on the outcome
//! is never left hanging.
//!
//! [`CountingCompletion`] fans one completion out over several transport
//! writes: it fires success once every part has succeeded, or failure on
//! the first part that fails, and never both.
//!
//! [`HeldCompletion`] delays a completion that resolves while its caller
//! still holds a lock, so the callback never runs under that lock.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::oneshot;

use crate::error::ConnectionError;

type Callback = Box<dyn FnOnce(Result<(), ConnectionError>) + Send>;

/// Outcome callback for an asynchronous write.
pub struct Completion {
    callback: Option<Callback>,
}

impl Completion {
    /// Completion that invokes `callback` with the outcome.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<(), ConnectionError>) + Send + 'static,
    {
        Self { callback: Some(Box::new(callback)) }
    }

    /// Completion that ignores the outcome.
    pub fn noop() -> Self {
        Self { callback: None }
    }

    /// Completion paired with a receiver that yields the outcome.
    pub fn channel() -> (Self, oneshot::Receiver<Result<(), ConnectionError>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move |result| {
            // Receiver gone means nobody is waiting for the outcome.
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    /// Resolve with `result`.
    pub fn complete(mut self, result: Result<(), ConnectionError>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }

    /// Resolve successfully.
    pub fn succeeded(self) {
        self.complete(Ok(()));
    }

    /// Resolve with `error`.
    pub fn failed(self, error: ConnectionError) {
        self.complete(Err(error));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(ConnectionError::CompletionDropped));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("pending", &self.callback.is_some()).finish()
    }
}

struct CountingState {
    remaining: usize,
    completion: Option<Completion>,
}

/// Counts down a set of part completions into one overall completion.
///
/// Clones share the same counter.
#[derive(Clone)]
pub struct CountingCompletion {
    state: Arc<Mutex<CountingState>>,
}

impl CountingCompletion {
    /// Fire `completion` once `count` parts have succeeded.
    ///
    /// With `count == 0` the completion succeeds immediately.
    pub fn new(completion: Completion, count: usize) -> Self {
        let completion = if count == 0 {
            completion.succeeded();
            None
        } else {
            Some(completion)
        };
        Self { state: Arc::new(Mutex::new(CountingState { remaining: count, completion })) }
    }

    /// Completion for one of the counted parts.
    ///
    /// Creates no new obligation: it resolves one of the `count` parts the
    /// tracker was created with.
    pub fn part(&self) -> Completion {
        let tracker = self.clone();
        Completion::new(move |result| tracker.record(result))
    }

    /// Add one part to the count and return its completion.
    ///
    /// Used when the number of parts is discovered while they are produced.
    pub fn add_part(&self) -> Completion {
        self.lock().remaining += 1;
        self.part()
    }

    /// Resolve one part successfully without handing out a completion.
    pub fn release(&self) {
        self.record(Ok(()));
    }

    /// Fail the overall completion unless it already fired.
    pub fn fail(&self, error: ConnectionError) {
        self.record(Err(error));
    }

    /// Whether the overall completion has fired
    pub fn is_done(&self) -> bool {
        self.lock().completion.is_none()
    }

    /// Parts still outstanding
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    fn record(&self, result: Result<(), ConnectionError>) {
        let fire = {
            let mut state = self.lock();
            match result {
                Ok(()) => {
                    state.remaining = state.remaining.saturating_sub(1);
                    if state.remaining == 0 { state.completion.take().map(|c| (c, Ok(()))) } else { None }
                },
                Err(error) => state.completion.take().map(|c| (c, Err(error))),
            }
        };
        if let Some((completion, result)) = fire {
            completion.complete(result);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CountingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CountingCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CountingCompletion")
            .field("remaining", &state.remaining)
            .field("done", &state.completion.is_none())
            .finish()
    }
}

struct HeldState {
    held: bool,
    completion: Option<Completion>,
    outcome: Option<Result<(), ConnectionError>>,
}

/// Gate in front of a completion.
///
/// Created with [`HeldCompletion::hold`], which returns the completion to
/// pass down in place of the original. An outcome arriving before
/// [`release`](Self::release) is kept and delivered by `release`; later
/// outcomes are delivered directly. Dropping the gate releases it.
pub struct HeldCompletion {
    state: Arc<Mutex<HeldState>>,
}

impl HeldCompletion {
    /// Hold `completion` back until the returned gate is released.
    pub fn hold(completion: Completion) -> (Completion, Self) {
        let state = Arc::new(Mutex::new(HeldState {
            held: true,
            completion: Some(completion),
            outcome: None,
        }));
        let shared = Arc::clone(&state);
        let forward = Completion::new(move |result| {
            let fire = {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if state.held {
                    state.outcome = Some(result);
                    None
                } else {
                    state.completion.take().map(|completion| (completion, result))
                }
            };
            if let Some((completion, result)) = fire {
                completion.complete(result);
            }
        });
        (forward, Self { state })
    }

    /// Stop holding and deliver an outcome that already arrived.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for HeldCompletion {
    fn drop(&mut self) {
        let fire = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.held = false;
            match state.outcome.take() {
                Some(result) => state.completion.take().map(|completion| (completion, result)),
                None => None,
            }
        };
        if let Some((completion, result)) = fire {
            completion.complete(result);
        }
    }
}

impl fmt::Debug for HeldCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("HeldCompletion")
            .field("held", &state.held)
            .field("resolved", &state.outcome.is_some())
            .finish()
    }
}
