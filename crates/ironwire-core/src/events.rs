//! Listener registries for connection lifecycle events.
//!
//! Listeners run synchronously on the thread that raised the event, in
//! registration order. A listener returning an error is logged and skipped;
//! the remaining listeners still run.

use std::{
    error::Error,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use ironwire_proto::CloseInfo;

use crate::error::ConnectionError;

/// Error type listeners may return.
pub type ListenerError = Box<dyn Error + Send + Sync>;

/// Outcome of a single listener invocation.
pub type ListenerResult = Result<(), ListenerError>;

type Listener<T> = Arc<dyn Fn(&T) -> ListenerResult + Send + Sync>;

/// Ordered collection of listeners for events of type `T`.
pub struct Listeners<T> {
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> Listeners<T> {
    /// Empty registry
    pub fn new() -> Self {
        Self { listeners: Mutex::new(Vec::new()) }
    }

    /// Append a listener. Listeners fire in registration order.
    pub fn register<F>(&self, listener: F)
    where
        F: Fn(&T) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::new(listener));
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener and return how many failed.
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may register further listeners.
    pub fn notify(&self, event: &T) -> usize
    where
        T: fmt::Debug,
    {
        let snapshot: Vec<Listener<T>> =
            self.listeners.lock().unwrap_or_else(PoisonError::into_inner).clone();

        let mut failures = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            if let Err(error) = listener(event) {
                failures += 1;
                tracing::warn!(listener = index, ?event, %error, "event listener failed");
            }
        }
        failures
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

/// The secure handshake completed for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFinished {
    /// Session the handshake ran on
    pub session_id: u64,
}

/// A connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionClosed {
    /// Session that closed
    pub session_id: u64,
    /// Close handshake details, if a Close frame was exchanged
    pub close_info: Option<CloseInfo>,
}

/// A connection hit an error it could not recover from locally.
#[derive(Debug)]
pub struct ConnectionException {
    /// Session that failed
    pub session_id: u64,
    /// What went wrong
    pub error: ConnectionError,
}
