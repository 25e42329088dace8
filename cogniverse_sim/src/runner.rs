//! Scenario runner - drives a client session against the mock backend.

use crate::context::SimContext;
use crate::error::{check, SimError};
use crate::mock::{MockBackend, MockFaults};
use crate::scenarios::ScenarioId;

use cogniverse_core::{
    ApiClient, MemoryTokenStore, PollEvent, PollerConfig, SimulationSession,
    StopReason, TokenStore,
};
use cogniverse_env::ClientContext;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

type SimApi = ApiClient<MockBackend>;
type SimSession = SimulationSession<SimContext, SimApi>;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual time consumed
    pub virtual_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub requests: u64,
    pub polls: u64,
    pub refreshes: u64,
    pub unauthorized: u64,
    pub injected_failures: u64,
    pub max_concurrent_polls: u64,
    /// Events in the client log at the end of the run
    pub events_logged: usize,
    /// Events announced through `PollEvent::NewEvents`
    pub events_reported: usize,
    pub tick_failures: u64,
}

/// Runs polling scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Poll interval
    interval: Duration,

    /// Virtual-time budget per wait
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            interval: Duration::from_secs(2),
            max_duration_secs: 600.0,
        }
    }

    /// Sets the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the virtual-time budget.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
        let outcome = match runtime {
            Ok(runtime) => runtime.block_on(self.execute(scenario)),
            Err(e) => Err((SimError::from(e), ScenarioMetrics::default(), 0.0)),
        };

        match outcome {
            Ok((metrics, virtual_time_secs)) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: true,
                virtual_time_secs,
                failure_reason: None,
                metrics,
            },
            Err((error, metrics, virtual_time_secs)) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                virtual_time_secs,
                failure_reason: Some(error.to_string()),
                metrics,
            },
        }
    }

    async fn execute(
        &self,
        scenario: ScenarioId,
    ) -> Result<(ScenarioMetrics, f64), (SimError, ScenarioMetrics, f64)> {
        let mut harness = match Harness::new(self, faults_for(scenario)).await {
            Ok(harness) => harness,
            Err(e) => return Err((e, ScenarioMetrics::default(), 0.0)),
        };

        let result = match scenario {
            ScenarioId::SteadyStream => harness.run_steady_stream().await,
            ScenarioId::DuplicateReplay => harness.run_duplicate_replay().await,
            ScenarioId::TerminalStop => harness.run_terminal_stop().await,
            ScenarioId::FlakyBackend => harness.run_flaky_backend().await,
            ScenarioId::Outage => harness.run_outage().await,
            ScenarioId::TokenExpiry => harness.run_token_expiry().await,
            ScenarioId::SlowBackend => harness.run_slow_backend().await,
            ScenarioId::AdvanceResume => harness.run_advance_resume().await,
        };

        harness.session.reset();
        harness.drain_events();
        let metrics = harness.metrics();
        let elapsed = harness.ctx.now().as_secs_f64();
        match result {
            Ok(()) => Ok((metrics, elapsed)),
            Err(e) => Err((e, metrics, elapsed)),
        }
    }
}

/// Backend behaviour for each scenario.
fn faults_for(scenario: ScenarioId) -> MockFaults {
    let base = MockFaults::default();
    match scenario {
        ScenarioId::SteadyStream => MockFaults {
            events_per_poll: 3,
            terminal_after_polls: Some(10),
            ..base
        },
        ScenarioId::DuplicateReplay => MockFaults {
            replay_duplicates: true,
            terminal_after_polls: Some(12),
            ..base
        },
        ScenarioId::TerminalStop => MockFaults {
            terminal_after_polls: Some(3),
            ..base
        },
        ScenarioId::FlakyBackend => MockFaults {
            failure_rate: 0.35,
            max_failure_streak: 3,
            terminal_after_polls: Some(12),
            ..base
        },
        ScenarioId::Outage => MockFaults {
            outage_after_polls: Some(4),
            terminal_after_polls: None,
            ..base
        },
        ScenarioId::TokenExpiry => MockFaults {
            rotate_token_every: Some(3),
            terminal_after_polls: Some(10),
            ..base
        },
        ScenarioId::SlowBackend => MockFaults {
            latency: Duration::from_secs(5),
            jitter: Duration::from_secs(1),
            terminal_after_polls: Some(6),
            ..base
        },
        ScenarioId::AdvanceResume => MockFaults {
            terminal_after_polls: Some(3),
            ..base
        },
    }
}

fn demo_agents() -> Vec<Value> {
    vec![
        json!({"agentid": 1, "agentname": "Ada", "agentrole": "Planner", "agentskill": ["logistics"]}),
        json!({"agentid": 2, "agentname": "Bashir", "agentrole": "Safecracker", "agentmbti": "ISTP"}),
        json!({"agentid": 3, "agentname": "Chen", "agentrole": "Lookout", "agentquirk": "hums"}),
    ]
}

/// One client session wired to one mock backend.
/// Converts a virtual-time budget, rejecting zero, negative and non-finite values.
fn budget_from_secs(secs: f64) -> Result<Duration, SimError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(budget) if !budget.is_zero() => Ok(budget),
        _ => Err(SimError::InvalidDuration(secs)),
    }
}

struct Harness {
    ctx: Arc<SimContext>,
    mock: Arc<MockBackend>,
    api: Arc<SimApi>,
    tokens: Arc<MemoryTokenStore>,
    session: SimSession,
    events: UnboundedReceiver<PollEvent>,
    interval: Duration,
    budget: Duration,
    events_reported: usize,
    tick_failures: u64,
}

impl Harness {
    async fn new(runner: &ScenarioRunner, faults: MockFaults) -> Result<Self, SimError> {
        let budget = budget_from_secs(runner.max_duration_secs)?;
        let ctx = SimContext::shared(runner.seed);
        let mock = Arc::new(MockBackend::new(Arc::clone(&ctx), faults));
        let tokens = Arc::new(MemoryTokenStore::new());
        let store: Arc<dyn TokenStore> = tokens.clone();
        let api = Arc::new(ApiClient::new(Arc::clone(&mock), "http://cogniverse.sim", store));
        api.login("sim-operator", "sim-password").await?;

        let session = SimulationSession::new(
            Arc::clone(&ctx),
            Arc::clone(&api),
            PollerConfig {
                interval: runner.interval,
                max_consecutive_failures: 5,
            },
        )
        .with_project("sim-project");
        let events = session.poller().subscribe();

        Ok(Self {
            ctx,
            mock,
            api,
            tokens,
            session,
            events,
            interval: runner.interval,
            budget,
            events_reported: 0,
            tick_failures: 0,
        })
    }

    async fn create(&self) -> Result<String, SimError> {
        let simulation = self
            .session
            .create("The crew plans a museum heist", &demo_agents())
            .await?;
        simulation
            .id
            .ok_or_else(|| SimError::Assertion("created simulation has no id".into()))
    }

    /// Yields until the poller stops and its last request has returned.
    async fn wait_until_stopped(&mut self) -> Result<StopReason, SimError> {
        let deadline = self.ctx.now() + self.budget;
        while self.session.poller().is_polling() {
            if self.ctx.now() >= deadline {
                self.session.poller().stop();
                return Err(SimError::Timeout(self.budget.as_secs_f64()));
            }
            tokio::task::yield_now().await;
        }
        while self.session.poller().is_in_flight() {
            tokio::task::yield_now().await;
        }
        self.drain_events();
        self.session
            .poller()
            .snapshot()
            .stop_reason
            .ok_or_else(|| SimError::Assertion("poller stopped without a reason".into()))
    }

    /// Lets `ticks` poll intervals of virtual time pass.
    async fn idle(&self, ticks: u32) {
        for _ in 0..ticks {
            self.ctx.sleep(self.interval).await;
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                PollEvent::NewEvents { events, .. } => self.events_reported += events.len(),
                PollEvent::TickFailed { .. } => self.tick_failures += 1,
                PollEvent::StatusChanged { status, .. } => debug!("status -> {}", status),
                PollEvent::Stopped { reason, .. } => debug!("stopped: {:?}", reason),
            }
        }
    }

    fn metrics(&self) -> ScenarioMetrics {
        let stats = self.mock.stats();
        ScenarioMetrics {
            requests: stats.requests,
            polls: stats.polls,
            refreshes: stats.refreshes,
            unauthorized: stats.unauthorized,
            injected_failures: stats.injected_failures,
            max_concurrent_polls: stats.max_concurrent_polls,
            events_logged: self.session.log().len(),
            events_reported: self.events_reported,
            tick_failures: self.tick_failures,
        }
    }

    fn expect_terminal(reason: &StopReason) -> Result<(), SimError> {
        check(
            matches!(reason, StopReason::Terminal(status) if status == "completed"),
            || format!("expected terminal stop, got {:?}", reason),
        )
    }

    /// Log holds every emitted event exactly once, filler excluded.
    fn verify_log(&self, simulation_id: &str) -> Result<(), SimError> {
        let log = self.session.log();
        let emitted = self.mock.emitted_event_ids(simulation_id);

        let unique: HashSet<&str> = log.iter().map(|e| e.id.as_str()).collect();
        check(unique.len() == log.len(), || {
            format!("log repeats ids: {} entries, {} unique", log.len(), unique.len())
        })?;

        let expected: HashSet<&str> = emitted.iter().map(String::as_str).collect();
        check(unique == expected, || {
            format!("log has {} ids, backend emitted {}", unique.len(), expected.len())
        })?;

        check(self.events_reported == log.len(), || {
            format!(
                "{} events reported on the channel, {} in the log",
                self.events_reported,
                log.len()
            )
        })
    }

    fn verify_single_flight(&self) -> Result<(), SimError> {
        let max = self.mock.stats().max_concurrent_polls;
        check(max <= 1, || format!("{} polls were in flight at once", max))
    }

    /// After a stop, virtual time passes without any new poll.
    async fn verify_quiet_after_stop(&self) -> Result<(), SimError> {
        let before = self.mock.stats().polls;
        self.idle(10).await;
        let after = self.mock.stats().polls;
        check(before == after && !self.session.poller().is_polling(), || {
            format!("{} polls issued after the loop stopped", after - before)
        })
    }

    /// DST-001: SteadyStream - healthy backend, three events per poll.
    async fn run_steady_stream(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        let reason = self.wait_until_stopped().await?;
        Self::expect_terminal(&reason)?;
        self.verify_log(&id)?;
        self.verify_single_flight()?;
        self.verify_quiet_after_stop().await
    }

    /// DST-002: DuplicateReplay - old events resent inside responses.
    async fn run_duplicate_replay(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        let reason = self.wait_until_stopped().await?;
        Self::expect_terminal(&reason)?;
        self.verify_log(&id)
    }

    /// DST-003: TerminalStop - completion ends polling for good.
    async fn run_terminal_stop(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        let reason = self.wait_until_stopped().await?;
        Self::expect_terminal(&reason)?;
        let polls = self.mock.stats().polls;
        check(polls == 3, || format!("expected 3 polls before completion, saw {}", polls))?;
        self.verify_log(&id)?;
        self.verify_quiet_after_stop().await
    }

    /// DST-004: FlakyBackend - intermittent 503s below the failure cap.
    async fn run_flaky_backend(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        let reason = self.wait_until_stopped().await?;
        Self::expect_terminal(&reason)?;
        self.verify_log(&id)?;
        let injected = self.mock.stats().injected_failures;
        check(self.tick_failures == injected, || {
            format!("{} failures reported, {} injected", self.tick_failures, injected)
        })
    }

    /// DST-005: Outage - backend dies after four polls.
    async fn run_outage(&mut self) -> Result<(), SimError> {
        self.create().await?;
        let reason = self.wait_until_stopped().await?;
        check(reason == StopReason::TooManyFailures, || {
            format!("expected failure cap stop, got {:?}", reason)
        })?;
        let polls = self.mock.stats().polls;
        check(polls == 4 + 5, || format!("expected 9 polls, saw {}", polls))?;
        check(self.tick_failures == 5, || {
            format!("expected 5 reported failures, saw {}", self.tick_failures)
        })?;
        self.verify_quiet_after_stop().await
    }

    /// DST-006: TokenExpiry - rotating access tokens, then a revoked refresh.
    async fn run_token_expiry(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        let reason = self.wait_until_stopped().await?;
        Self::expect_terminal(&reason)?;
        self.verify_log(&id)?;

        let stats = self.mock.stats();
        check(stats.refreshes > 0, || "token never rotated".to_string())?;
        check(stats.unauthorized == stats.refreshes, || {
            format!(
                "{} rejected requests but {} refreshes",
                stats.unauthorized, stats.refreshes
            )
        })?;
        check(self.tokens.access_token().is_some(), || {
            "session lost its access token".to_string()
        })?;

        self.mock.revoke_refresh_token();
        self.mock.expire_access_token();
        let outcome = self.api.get_simulation(&id).await;
        check(
            matches!(&outcome, Err(e) if e.is_unauthorized()),
            || format!("expected a 401 after the failed refresh, got {:?}", outcome),
        )?;
        check(
            self.tokens.access_token().is_none() && self.tokens.refresh_token().is_none(),
            || "tokens survived a failed refresh".to_string(),
        )
    }

    /// DST-007: SlowBackend - responses take longer than the interval.
    async fn run_slow_backend(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        let reason = self.wait_until_stopped().await?;
        Self::expect_terminal(&reason)?;
        self.verify_single_flight()?;
        self.verify_log(&id)
    }

    /// DST-008: AdvanceResume - advance and fate restart a finished run.
    async fn run_advance_resume(&mut self) -> Result<(), SimError> {
        let id = self.create().await?;
        Self::expect_terminal(&self.wait_until_stopped().await?)?;
        let first_run: Vec<String> = self.session.log().iter().map(|e| e.id.clone()).collect();

        self.session.advance(2).await?;
        Self::expect_terminal(&self.wait_until_stopped().await?)?;

        self.session.fate(Some("  a meteor shower ")).await?;
        Self::expect_terminal(&self.wait_until_stopped().await?)?;

        let log = self.session.log();
        check(
            log.iter().take(first_run.len()).map(|e| &e.id).eq(first_run.iter()),
            || "restart on the same simulation rewrote the log".to_string(),
        )?;
        check(
            log.iter().any(|e| e.text == "Fate intervenes: a meteor shower"),
            || "fate event missing from the log".to_string(),
        )?;
        self.verify_log(&id)?;

        let history = self.session.history();
        check(
            history.len() == 1 && history[0].status == "completed",
            || format!("unexpected history: {:?}", history),
        )
    }
}
