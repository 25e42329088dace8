//! Simulation context implementing ClientContext for deterministic testing.

use async_trait::async_trait;
use cogniverse_env::ClientContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `ClientContext` using:
/// - A virtual clock that only moves when someone sleeps
/// - A seeded ChaCha8 RNG for fault injection
/// - Simulated sleep that advances virtual time, then yields to the runtime
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *lock(&self.virtual_time_ns) += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Runs `f` with exclusive access to the seeded RNG.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> R) -> R {
        f(&mut lock(&self.rng))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl ClientContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance_time(duration);
        // Let every other ready task observe the new time
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, at_ms = self.now().as_millis() as u64, "spawning task");
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_sim_context_deterministic_rng() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let a: Vec<u32> = (0..8).map(|_| ctx1.with_rng(|rng| rng.gen())).collect();
        let b: Vec<u32> = (0..8).map(|_| ctx2.with_rng(|rng| rng.gen())).collect();

        assert_eq!(a, b);
    }

    #[test]
    fn test_sim_context_seed_and_epoch() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
        assert_eq!(ctx.system_time(), UNIX_EPOCH + Duration::from_secs(1704067200));
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        assert_eq!(ctx1.now(), ctx2.now());
    }

    #[tokio::test]
    async fn test_sleep_advances_virtual_time_only() {
        let ctx = SimContext::new(1);
        let wall = std::time::Instant::now();

        ctx.sleep(Duration::from_secs(3600)).await;

        assert_eq!(ctx.now(), Duration::from_secs(3600));
        assert!(wall.elapsed() < Duration::from_secs(5));
    }
}
