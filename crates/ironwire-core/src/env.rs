//! Environment abstraction for deterministic testing.
//!
//! Time and randomness are injected, so the keep-alive timer and the masking
//! keys can be driven by a seeded simulation in tests and by the system in
//! production.

use std::{future::Future, time::Duration};

use rand::RngCore;

/// Abstracts time and randomness for the connection engines.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current instant
    fn now(&self) -> std::time::Instant;

    /// Future that resolves after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    ///
    /// Masking keys must not be predictable by the peer; production
    /// implementations use a cryptographically seeded generator.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Production environment: tokio time and the thread-local RNG.
///
/// `now()` reads the tokio clock, so it follows virtual time in paused
/// runtimes the same way `sleep()` does.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
