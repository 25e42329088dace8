//! Simulation session lifecycle: create, advance, fate, reset.
//!
//! The session owns one [`SimulationPoller`] and keeps a short history of
//! the simulations started from it. Validation failures are returned as
//! [`SessionError`] before any request is made.

use cogniverse_env::ClientContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use crate::error::{ApiError, SessionError};
use crate::normalize::{normalize_simulation, simulation_id, unwrap_simulation, SimEvent, Simulation};
use crate::payload::SimulationPayload;
use crate::poller::{PollerConfig, SimulationBackend, SimulationPoller};

/// Most recent simulations kept in the history.
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub scenario: String,
    pub status: String,
    pub created_at_ms: u64,
    pub updated_at_ms: Option<u64>,
    pub project_id: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    simulation_id: Option<String>,
    /// Simulation as returned by the create call, until the first poll lands
    initial: Option<Simulation>,
    history: Vec<HistoryEntry>,
}

pub struct SimulationSession<C: ClientContext, B: SimulationBackend> {
    ctx: Arc<C>,
    backend: Arc<B>,
    poller: SimulationPoller<C, B>,
    project_id: Option<String>,
    state: Mutex<SessionState>,
}

impl<C: ClientContext, B: SimulationBackend> SimulationSession<C, B> {
    pub fn new(ctx: Arc<C>, backend: Arc<B>, config: PollerConfig) -> Self {
        let poller = SimulationPoller::new(Arc::clone(&ctx), Arc::clone(&backend), config);
        Self {
            ctx,
            backend,
            poller,
            project_id: None,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Tags history entries with the project the simulations belong to.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn poller(&self) -> &SimulationPoller<C, B> {
        &self.poller
    }

    pub fn simulation_id(&self) -> Option<String> {
        self.state().simulation_id.clone()
    }

    /// Latest known view of the current simulation.
    pub fn current(&self) -> Option<Simulation> {
        let state = self.state();
        state.simulation_id.as_ref()?;
        self.poller.snapshot().simulation.or_else(|| state.initial.clone())
    }

    /// Events seen so far, in arrival order.
    pub fn log(&self) -> Vec<SimEvent> {
        self.poller.snapshot().log
    }

    /// Creates a simulation from the scenario and selected agents, then
    /// starts polling it.
    pub async fn create(
        &self,
        scenario_text: &str,
        agents: &[Value],
    ) -> Result<Simulation, SessionError> {
        let scenario = scenario_text.trim();
        if scenario.is_empty() {
            return Err(SessionError::EmptyScenario);
        }
        if self.current().is_some_and(|sim| !sim.is_terminal()) {
            return Err(SessionError::SimulationInProgress);
        }
        if agents.is_empty() {
            return Err(SessionError::NoAgents);
        }

        let payload = SimulationPayload::build(scenario, agents);
        let response = match self.backend.create_simulation(&payload).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create simulation");
                self.poller.stop();
                return Err(e.into());
            }
        };

        let raw = unwrap_simulation(&response);
        if raw.is_null() {
            return Err(ApiError::InvalidResponse("Simulation payload missing from response".into()).into());
        }
        let id = simulation_id(raw).ok_or(SessionError::MissingSimulationId)?;
        let simulation = normalize_simulation(raw);

        let entry = HistoryEntry {
            id: id.clone(),
            scenario: simulation.scenario.clone().unwrap_or_else(|| scenario.to_string()),
            status: simulation.status.clone().unwrap_or_else(|| "pending".to_string()),
            created_at_ms: self.now_ms(),
            updated_at_ms: None,
            project_id: self.project_id.clone(),
        };
        {
            let mut state = self.state();
            state.simulation_id = Some(id.clone());
            state.initial = Some(simulation.clone());
            state.history.retain(|existing| existing.id != id);
            state.history.insert(0, entry);
            state.history.truncate(HISTORY_LIMIT);
        }

        tracing::info!(simulation_id = %id, agents = payload.custom_agents.len(), "Simulation queued");
        self.poller.start(&id);
        Ok(simulation)
    }

    /// Advances the current simulation and restarts polling.
    pub async fn advance(&self, steps: u32) -> Result<(), SessionError> {
        let id = self.simulation_id().ok_or(SessionError::NoActiveSimulation)?;
        self.backend.advance_simulation(&id, steps).await?;
        tracing::info!(simulation_id = %id, steps, "simulation advanced");
        self.poller.start(&id);
        Ok(())
    }

    /// Triggers a fate twist. A blank prompt lets the backend choose.
    pub async fn fate(&self, prompt: Option<&str>) -> Result<(), SessionError> {
        let id = self.simulation_id().ok_or(SessionError::NoActiveSimulation)?;
        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty());
        self.backend.trigger_fate(&id, prompt).await?;
        tracing::info!(simulation_id = %id, custom_prompt = prompt.is_some(), "fate twist queued");
        self.poller.start(&id);
        Ok(())
    }

    /// Stops polling and forgets the current simulation. History is kept.
    pub fn reset(&self) {
        self.poller.reset();
        let mut state = self.state();
        state.simulation_id = None;
        state.initial = None;
    }

    /// History, newest first, with statuses refreshed from the poller.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let snapshot = self.poller.snapshot();
        let now = self.now_ms();
        let mut state = self.state();
        if let Some(sim) = snapshot.simulation {
            let id = sim.id.or(snapshot.simulation_id);
            if let (Some(id), Some(status)) = (id, sim.status) {
                if let Some(entry) = state.history.iter_mut().find(|e| e.id == id) {
                    if entry.status != status {
                        entry.status = status;
                        entry.updated_at_ms = Some(now);
                    }
                }
            }
        }
        state.history.clone()
    }

    fn now_ms(&self) -> u64 {
        self.ctx
            .system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use cogniverse_env::TokioContext;
    use serde_json::json;
    use std::time::Duration;

    fn session(backend: &Arc<ScriptedBackend>) -> SimulationSession<TokioContext, ScriptedBackend> {
        SimulationSession::new(
            TokioContext::shared(),
            Arc::clone(backend),
            PollerConfig {
                interval: Duration::from_secs(3600),
                max_consecutive_failures: 5,
            },
        )
    }

    fn agents() -> Vec<Value> {
        vec![json!({"agentname": "Ada"})]
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = session(&backend);

        assert!(matches!(session.create("   ", &agents()).await, Err(SessionError::EmptyScenario)));
        assert!(matches!(session.create("x", &[]).await, Err(SessionError::NoAgents)));
        assert!(matches!(session.advance(1).await, Err(SessionError::NoActiveSimulation)));
        assert!(matches!(session.fate(None).await, Err(SessionError::NoActiveSimulation)));
        assert!(backend.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_records_history_and_starts_polling() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_create(Ok(json!({"simulation": {"simulation_id": 12, "status": "running"}})));
        let session = session(&backend);

        let sim = session.create(" Heist ", &agents()).await.unwrap();

        assert_eq!(sim.id.as_deref(), Some("12"));
        assert_eq!(session.simulation_id().as_deref(), Some("12"));
        assert!(session.poller().is_polling());
        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].scenario, "Heist");
        assert_eq!(history[0].status, "running");
        session.reset();
    }

    #[tokio::test]
    async fn test_rejects_while_in_progress() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_create(Ok(json!({"id": "a", "status": "running"})));
        let session = session(&backend);
        session.create("one", &agents()).await.unwrap();

        let err = session.create("two", &agents()).await.unwrap_err();

        assert!(matches!(err, SessionError::SimulationInProgress));
        session.reset();
    }

    #[tokio::test]
    async fn test_missing_id_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_create(Ok(json!({"status": "running"})));
        let session = session(&backend);

        let err = session.create("one", &agents()).await.unwrap_err();

        assert!(matches!(err, SessionError::MissingSimulationId));
        assert!(!session.poller().is_polling());
    }

    #[tokio::test]
    async fn test_history_is_bounded_newest_first() {
        let backend = Arc::new(ScriptedBackend::new());
        let session = session(&backend);
        for i in 0..12 {
            backend.push_create(Ok(json!({"id": format!("s{}", i), "status": "completed"})));
            session.create("run", &agents()).await.unwrap();
        }
        session.reset();

        let history = session.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].id, "s11");
        assert_eq!(history[9].id, "s2");
    }

    #[tokio::test]
    async fn test_fate_trims_prompt_and_advance_restarts() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_create(Ok(json!({"id": "f1", "status": "running"})));
        let session = session(&backend);
        session.create("story", &agents()).await.unwrap();

        session.fate(Some("  ")).await.unwrap();
        session.fate(Some(" storm ")).await.unwrap();
        session.poller().stop();
        session.advance(2).await.unwrap();

        let fates = backend.fates.lock().unwrap().clone();
        assert_eq!(fates, vec![("f1".to_string(), None), ("f1".to_string(), Some("storm".to_string()))]);
        assert_eq!(backend.advanced.lock().unwrap().clone(), vec![("f1".to_string(), 2)]);
        assert!(session.poller().is_polling());
        session.reset();
        assert!(session.current().is_none());
    }
}
