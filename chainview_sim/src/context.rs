//! Simulation context implementing SyncContext for deterministic testing.

use async_trait::async_trait;
use chainview_env::SyncContext;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::Instrument;

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `SyncContext` using:
/// - A virtual clock that only moves when a task sleeps
/// - A seeded ChaCha8 RNG for scripted remote behaviour
///
/// Sleeping advances the clock by the full duration and yields once, so
/// reconnect backoff costs no wall-clock time but stays measurable.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG shared by clones
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = lock(&self.virtual_time_ns);
        *time = time.saturating_add(duration.as_nanos() as u64);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Draws a value in `[0, upper)` from the shared RNG.
    pub fn gen_below(&self, upper: u64) -> u64 {
        if upper == 0 {
            return 0;
        }
        lock(&self.rng).gen_range(0..upper)
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
        }
    }
}

#[async_trait]
impl SyncContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("sim_task", name = %name, seed = self.seed);
        tokio::spawn(future.instrument(span));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
