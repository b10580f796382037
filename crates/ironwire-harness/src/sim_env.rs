//! Seeded environment.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use ironwire_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Environment with a seeded RNG and tokio time.
///
/// Two environments built from the same seed produce the same sequence of
/// masking keys. Time follows the tokio clock, so tests running with
/// `start_paused = true` control it completely.
#[derive(Clone, Debug)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
