//! Simulation polling loop.
//!
//! ```text
//! start(id) ──► tick ──► sleep(interval) ──► tick ──► ...
//!                │
//!                ├─ in-flight guard held? ──► Skipped (no request)
//!                ├─ GET /simulations/{id}
//!                │     ok  ──► merge unseen events, reset failures
//!                │     err ──► failures += 1 (stop at the cap)
//!                └─ terminal status ──► stop
//! ```
//!
//! Ticks are spawned, not awaited, so a slow request never delays the
//! schedule; the guard turns overlapping ticks into no-ops instead.
//! Every start bumps a generation counter; a loop exits as soon as the
//! active generation is no longer its own.

use async_trait::async_trait;
use cogniverse_env::{ClientContext, HttpTransport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api_client::ApiClient;
use crate::error::ApiError;
use crate::normalize::{normalize_simulation, SimEvent, Simulation};
use crate::payload::SimulationPayload;

/// The simulation routes the poller and the session manager need.
#[async_trait]
pub trait SimulationBackend: Send + Sync + 'static {
    async fn create_simulation(&self, payload: &SimulationPayload) -> Result<Value, ApiError>;

    async fn get_simulation(&self, id: &str) -> Result<Value, ApiError>;

    async fn advance_simulation(&self, id: &str, steps: u32) -> Result<Value, ApiError>;

    async fn trigger_fate(&self, id: &str, prompt: Option<&str>) -> Result<Value, ApiError>;
}

#[async_trait]
impl<T: HttpTransport> SimulationBackend for ApiClient<T> {
    async fn create_simulation(&self, payload: &SimulationPayload) -> Result<Value, ApiError> {
        ApiClient::create_simulation(self, payload).await
    }

    async fn get_simulation(&self, id: &str) -> Result<Value, ApiError> {
        ApiClient::get_simulation(self, id).await
    }

    async fn advance_simulation(&self, id: &str, steps: u32) -> Result<Value, ApiError> {
        ApiClient::advance_simulation(self, id, steps).await
    }

    async fn trigger_fate(&self, id: &str, prompt: Option<&str>) -> Result<Value, ApiError> {
        ApiClient::trigger_fate(self, id, prompt).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between ticks
    pub interval: Duration,

    /// Consecutive failed ticks before the loop gives up
    pub max_consecutive_failures: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2_000),
            max_consecutive_failures: 5,
        }
    }
}

/// Why a polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The simulation reached this terminal status
    Terminal(String),
    TooManyFailures,
    /// `stop()` was called
    Cancelled,
}

/// Observable changes, reported on the optional event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PollEvent {
    NewEvents {
        simulation_id: String,
        events: Vec<SimEvent>,
    },
    StatusChanged {
        simulation_id: String,
        status: String,
    },
    TickFailed {
        simulation_id: String,
        error: String,
        consecutive: u32,
    },
    Stopped {
        simulation_id: String,
        reason: StopReason,
    },
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was in flight, or polling is stopped; nothing was sent
    Skipped,
    Polled { new_events: usize },
    Failed { consecutive: u32 },
    Stopped(StopReason),
}

/// Point-in-time copy of the poller's state.
#[derive(Debug, Clone, Default)]
pub struct PollSnapshot {
    pub simulation_id: Option<String>,
    pub simulation: Option<Simulation>,
    pub log: Vec<SimEvent>,
    pub consecutive_failures: u32,
    pub stop_reason: Option<StopReason>,
    pub polling: bool,
}

#[derive(Debug, Default)]
struct PollState {
    simulation_id: Option<String>,
    seen: HashSet<String>,
    log: Vec<SimEvent>,
    latest: Option<Simulation>,
    consecutive_failures: u32,
    stop_reason: Option<StopReason>,
}

/// Appends events whose id has not been seen and returns them.
pub fn merge_events(
    seen: &mut HashSet<String>,
    log: &mut Vec<SimEvent>,
    events: &[SimEvent],
) -> Vec<SimEvent> {
    let fresh: Vec<SimEvent> = events
        .iter()
        .filter(|event| seen.insert(event.id.clone()))
        .cloned()
        .collect();
    log.extend(fresh.iter().cloned());
    fresh
}

/// Releases the in-flight flag on drop, including on early return.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Inner<C, B> {
    ctx: Arc<C>,
    backend: Arc<B>,
    config: PollerConfig,
    state: Mutex<PollState>,
    in_flight: AtomicBool,
    /// Last generation handed out by `start`
    generation: AtomicU64,
    /// Generation of the running loop, 0 when stopped
    active: AtomicU64,
    /// Generation whose tick was skipped behind an older request
    catch_up: AtomicU64,
    events: Mutex<Option<mpsc::UnboundedSender<PollEvent>>>,
}

/// Polls one simulation at a time. Cheap to clone; clones share state.
pub struct SimulationPoller<C: ClientContext, B: SimulationBackend> {
    inner: Arc<Inner<C, B>>,
}

impl<C: ClientContext, B: SimulationBackend> Clone for SimulationPoller<C, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ClientContext, B: SimulationBackend> SimulationPoller<C, B> {
    pub fn new(ctx: Arc<C>, backend: Arc<B>, config: PollerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                backend,
                config,
                state: Mutex::new(PollState::default()),
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                active: AtomicU64::new(0),
                catch_up: AtomicU64::new(0),
                events: Mutex::new(None),
            }),
        }
    }

    /// Returns a receiver for poll events, replacing any earlier one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PollEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.events) = Some(tx);
        rx
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    pub fn is_polling(&self) -> bool {
        self.inner.active.load(Ordering::Acquire) != 0
    }

    /// True while a request is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PollSnapshot {
        let state = self.state();
        PollSnapshot {
            simulation_id: state.simulation_id.clone(),
            simulation: state.latest.clone(),
            log: state.log.clone(),
            consecutive_failures: state.consecutive_failures,
            stop_reason: state.stop_reason.clone(),
            polling: self.is_polling(),
        }
    }

    /// Starts (or restarts) polling in the background.
    ///
    /// Restarting on the same id keeps the seen set and the log.
    pub fn start(&self, simulation_id: &str) {
        let generation = self.begin(simulation_id);
        let poller = self.clone();
        self.inner
            .ctx
            .spawn("simulation-poller", async move { poller.run_loop(generation).await });
    }

    /// Polls inline until the loop stops, then waits for the last tick.
    pub async fn run_until_stopped(&self, simulation_id: &str) -> Option<StopReason> {
        let generation = self.begin(simulation_id);
        self.run_loop(generation).await;
        while self.is_in_flight() {
            self.inner.ctx.sleep(Duration::from_millis(10)).await;
        }
        self.state().stop_reason.clone()
    }

    /// Stops polling. In-flight results are still merged.
    pub fn stop(&self) {
        let previous = self.inner.active.swap(0, Ordering::AcqRel);
        if previous != 0 {
            self.finish(StopReason::Cancelled);
        }
    }

    /// Stops polling and forgets the simulation.
    pub fn reset(&self) {
        self.stop();
        *self.state() = PollState::default();
    }

    /// Performs one poll. Overlapping calls are no-ops.
    ///
    /// A tick skipped behind a request from before a restart is re-issued
    /// as soon as that request returns.
    pub async fn tick(&self) -> TickOutcome {
        let Some(guard) = InFlightGuard::acquire(&self.inner.in_flight) else {
            tracing::debug!("poll already in flight, skipping tick");
            let active = self.inner.active.load(Ordering::Acquire);
            self.inner.catch_up.store(active, Ordering::Release);
            return TickOutcome::Skipped;
        };
        let generation = self.inner.active.load(Ordering::Acquire);
        if generation == 0 {
            return TickOutcome::Skipped;
        }
        let Some(simulation_id) = self.state().simulation_id.clone() else {
            return TickOutcome::Skipped;
        };

        let outcome = match self.inner.backend.get_simulation(&simulation_id).await {
            Ok(raw) => self.on_success(generation, &simulation_id, &raw),
            Err(e) => self.on_failure(generation, &simulation_id, e),
        };
        drop(guard);

        let active = self.inner.active.load(Ordering::Acquire);
        if active != 0
            && active != generation
            && self
                .inner
                .catch_up
                .compare_exchange(active, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::debug!(generation = active, "re-issuing tick skipped during restart");
            self.spawn_tick();
        }
        outcome
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.active.load(Ordering::Acquire) == generation
    }

    fn spawn_tick(&self) {
        let poller = self.clone();
        self.inner.ctx.spawn("simulation-poll-tick", async move {
            poller.tick().await;
        });
    }

    fn begin(&self, simulation_id: &str) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        {
            let mut state = self.state();
            if state.simulation_id.as_deref() != Some(simulation_id) {
                *state = PollState {
                    simulation_id: Some(simulation_id.to_string()),
                    ..PollState::default()
                };
            }
            state.consecutive_failures = 0;
            state.stop_reason = None;
        }
        self.inner.active.store(generation, Ordering::Release);
        tracing::info!(simulation_id, generation, "polling started");
        generation
    }

    async fn run_loop(&self, generation: u64) {
        while self.is_current(generation) {
            self.spawn_tick();
            self.inner.ctx.sleep(self.inner.config.interval).await;
        }
        tracing::debug!(generation, "poll loop exited");
    }

    fn on_success(&self, generation: u64, simulation_id: &str, raw: &Value) -> TickOutcome {
        let simulation = normalize_simulation(raw);

        let (fresh, status_changed) = {
            let mut state = self.state();
            if state.simulation_id.as_deref() != Some(simulation_id) {
                // Reset or switched simulations while this request was out
                return TickOutcome::Skipped;
            }
            if self.is_current(generation) {
                state.consecutive_failures = 0;
            }
            let state = &mut *state;
            let fresh = merge_events(&mut state.seen, &mut state.log, &simulation.events);
            let previous = state.latest.as_ref().and_then(|s| s.status.clone());
            let status_changed = simulation.status.is_some() && simulation.status != previous;
            state.latest = Some(simulation.clone());
            (fresh, status_changed)
        };

        if !fresh.is_empty() {
            tracing::debug!(simulation_id, count = fresh.len(), "new simulation events");
        }
        let new_events = fresh.len();
        if new_events > 0 {
            self.emit(PollEvent::NewEvents {
                simulation_id: simulation_id.to_string(),
                events: fresh,
            });
        }
        if let (true, Some(status)) = (status_changed, simulation.status.as_ref()) {
            tracing::info!(simulation_id, status = %status, "simulation status changed");
            self.emit(PollEvent::StatusChanged {
                simulation_id: simulation_id.to_string(),
                status: status.clone(),
            });
        }

        if let Some(status) = simulation.status.as_ref().filter(|_| simulation.is_terminal()) {
            let reason = StopReason::Terminal(status.clone());
            if self.halt(generation, reason.clone()) {
                return TickOutcome::Stopped(reason);
            }
        }
        TickOutcome::Polled { new_events }
    }

    fn on_failure(&self, generation: u64, simulation_id: &str, error: ApiError) -> TickOutcome {
        let consecutive = {
            let mut state = self.state();
            if state.simulation_id.as_deref() != Some(simulation_id) {
                return TickOutcome::Skipped;
            }
            if !self.is_current(generation) {
                // Stopped or restarted while this request was out
                tracing::debug!(simulation_id, error = %error, "ignoring failure from a stale tick");
                return TickOutcome::Skipped;
            }
            state.consecutive_failures += 1;
            state.consecutive_failures
        };
        tracing::warn!(simulation_id, consecutive, error = %error, "Failed to refresh simulation");
        self.emit(PollEvent::TickFailed {
            simulation_id: simulation_id.to_string(),
            error: error.to_string(),
            consecutive,
        });

        if consecutive >= self.inner.config.max_consecutive_failures
            && self.halt(generation, StopReason::TooManyFailures)
        {
            return TickOutcome::Stopped(StopReason::TooManyFailures);
        }
        TickOutcome::Failed { consecutive }
    }

    /// Stops the loop if `generation` is still the active one.
    fn halt(&self, generation: u64, reason: StopReason) -> bool {
        let stopped = self
            .inner
            .active
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if stopped {
            self.finish(reason);
        }
        stopped
    }

    fn finish(&self, reason: StopReason) {
        let simulation_id = {
            let mut state = self.state();
            state.stop_reason = Some(reason.clone());
            state.simulation_id.clone().unwrap_or_default()
        };
        tracing::info!(simulation_id = %simulation_id, reason = ?reason, "polling stopped");
        self.emit(PollEvent::Stopped {
            simulation_id,
            reason,
        });
    }

    fn emit(&self, event: PollEvent) {
        if let Some(tx) = lock(&self.inner.events).as_ref() {
            // A dropped receiver just means nobody is listening
            let _ = tx.send(event);
        }
    }

    fn state(&self) -> MutexGuard<'_, PollState> {
        lock(&self.inner.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
