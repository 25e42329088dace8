//! In-memory CogniVerse backend with fault injection.
//!
//! Serves the auth and simulation routes the client touches during a
//! session. Every behaviour that can go wrong in production is a knob in
//! [`MockFaults`]: replayed events, early terminal status, failing polls,
//! token rotation and slow responses.

use async_trait::async_trait;
use cogniverse_env::{ClientContext, EnvError, HttpRequest, HttpResponse, HttpTransport, Method};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::context::SimContext;

/// Granularity of simulated response latency.
const LATENCY_STEP: Duration = Duration::from_millis(100);

/// Every fourth poll also carries a filler event the client must drop.
const NOISE_EVERY: u64 = 4;

const AGENT_NAMES: [&str; 3] = ["Ada", "Bashir", "Chen"];

#[derive(Debug, Clone)]
pub struct MockFaults {
    /// Agent events appended per poll while running
    pub events_per_poll: usize,

    /// Re-send a random sample of old events inside each response
    pub replay_duplicates: bool,

    /// Polls until the simulation reports `completed`
    pub terminal_after_polls: Option<u32>,

    /// Probability that a poll fails with 503
    pub failure_rate: f64,

    /// Longest run of random failures (keeps flaky below the stop cap)
    pub max_failure_streak: u32,

    /// Every poll after this many fails
    pub outage_after_polls: Option<u64>,

    /// Rotate the access token after this many authorized requests
    pub rotate_token_every: Option<u32>,

    /// Base response latency for polls
    pub latency: Duration,

    /// Extra random latency, uniformly in `[0, jitter]`
    pub jitter: Duration,
}

impl Default for MockFaults {
    fn default() -> Self {
        Self {
            events_per_poll: 2,
            replay_duplicates: false,
            terminal_after_polls: Some(8),
            failure_rate: 0.0,
            max_failure_streak: 0,
            outage_after_polls: None,
            rotate_token_every: None,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// Counters collected while serving requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MockStats {
    pub requests: u64,
    pub polls: u64,
    pub refreshes: u64,
    pub unauthorized: u64,
    pub injected_failures: u64,
    pub max_concurrent_polls: u64,
}

#[derive(Debug)]
struct MockSimulation {
    scenario: String,
    status: String,
    agents: Vec<Value>,
    events: Vec<Value>,
    next_event: u64,
    polls: u64,
    remaining_polls: Option<u32>,
}

impl MockSimulation {
    fn to_json(&self, id: &str, events: Vec<Value>) -> Value {
        json!({
            "id": id,
            "scenario": self.scenario,
            "status": self.status,
            "agents": self.agents,
            "events": events,
        })
    }

    fn push_event(&mut self, id: &str, actor: &str, summary: String) -> String {
        self.next_event += 1;
        let event_id = format!("{}-e{}", id, self.next_event);
        self.events.push(json!({
            "id": event_id,
            "type": "agent",
            "actor": actor,
            "summary": summary,
        }));
        event_id
    }
}

#[derive(Debug, Default)]
struct MockState {
    access_serial: u64,
    refresh_valid: bool,
    authorized_since_rotation: u32,
    simulations: BTreeMap<String, MockSimulation>,
    emitted: BTreeMap<String, Vec<String>>,
    next_simulation: u64,
    fail_next: u32,
    failure_streak: u32,
    concurrent_polls: u64,
    stats: MockStats,
}

impl MockState {
    fn access_token(&self) -> String {
        format!("access-{}", self.access_serial)
    }
}

/// Mock backend implementing `HttpTransport`.
pub struct MockBackend {
    ctx: Arc<SimContext>,
    faults: MockFaults,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(ctx: Arc<SimContext>, faults: MockFaults) -> Self {
        Self {
            ctx,
            faults,
            state: Mutex::new(MockState {
                refresh_valid: true,
                ..MockState::default()
            }),
        }
    }

    pub fn stats(&self) -> MockStats {
        self.state().stats.clone()
    }

    /// Ids of the agent events a simulation has produced, filler excluded.
    pub fn emitted_event_ids(&self, simulation_id: &str) -> Vec<String> {
        self.state()
            .emitted
            .get(simulation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fails the next `count` polls with 503.
    pub fn fail_next(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Invalidates the current access token immediately.
    pub fn expire_access_token(&self) {
        self.state().access_serial += 1;
    }

    /// Makes every future refresh attempt fail.
    pub fn revoke_refresh_token(&self) {
        self.state().refresh_valid = false;
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        let jitter_ns = self.faults.jitter.as_nanos() as u64;
        let extra = if jitter_ns > 0 {
            Duration::from_nanos(self.ctx.with_rng(|rng| rng.gen_range(0..=jitter_ns)))
        } else {
            Duration::ZERO
        };
        let deadline = self.ctx.now() + self.faults.latency + extra;
        while self.ctx.now() < deadline {
            self.ctx.sleep(LATENCY_STEP).await;
        }
    }

    fn route(&self, request: &HttpRequest) -> HttpResponse {
        let path = request.path().trim_end_matches('/').to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (request.method, segments.as_slice()) {
            (Method::Post, ["auth", "login"]) => self.login(),
            (Method::Post, ["auth", "refresh"]) => self.refresh(request),
            _ => {
                if let Some(denied) = self.authorize(request) {
                    return denied;
                }
                match (request.method, segments.as_slice()) {
                    (Method::Post, ["simulations"]) => self.create(request),
                    (Method::Get, ["simulations", id]) => self.poll(id),
                    (Method::Post, ["simulations", id, "advance"]) => self.advance(id, request),
                    (Method::Post, ["simulations", id, "fate"]) => self.fate(id, request),
                    _ => HttpResponse::json(404, &json!({"detail": "Not Found"})),
                }
            }
        }
    }

    fn login(&self) -> HttpResponse {
        let mut state = self.state();
        state.refresh_valid = true;
        HttpResponse::json(
            200,
            &json!({
                "access_token": state.access_token(),
                "refresh_token": "refresh-token",
                "token_type": "bearer",
            }),
        )
    }

    fn refresh(&self, request: &HttpRequest) -> HttpResponse {
        let mut state = self.state();
        state.stats.refreshes += 1;
        let presented = request.header("Authorization");
        if !state.refresh_valid || presented != Some("Bearer refresh-token") {
            return HttpResponse::json(401, &json!({"detail": "Invalid refresh token"}));
        }
        state.authorized_since_rotation = 0;
        HttpResponse::json(200, &json!({"access_token": state.access_token()}))
    }

    /// Returns a 401 response when the bearer token is not the current one.
    fn authorize(&self, request: &HttpRequest) -> Option<HttpResponse> {
        let mut state = self.state();
        let expected = format!("Bearer {}", state.access_token());
        if request.header("Authorization") != Some(expected.as_str()) {
            state.stats.unauthorized += 1;
            return Some(HttpResponse::json(401, &json!({"detail": "Token expired"})));
        }
        state.authorized_since_rotation += 1;
        if let Some(every) = self.faults.rotate_token_every {
            if state.authorized_since_rotation >= every {
                state.access_serial += 1;
                state.authorized_since_rotation = 0;
            }
        }
        None
    }

    fn create(&self, request: &HttpRequest) -> HttpResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let agents: Vec<Value> = body
            .get("custom_agents")
            .and_then(Value::as_array)
            .map(|slots| {
                slots
                    .iter()
                    .enumerate()
                    .map(|(i, slot)| {
                        json!({
                            "id": format!("agent-{}", i),
                            "name": slot.get("name").cloned().unwrap_or(Value::Null),
                            "emotional_state": "curious",
                            "memory": [],
                            "position": {"x": 0.5, "y": 0.5},
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut state = self.state();
        state.next_simulation += 1;
        let id = format!("sim-{}", state.next_simulation);
        let simulation = MockSimulation {
            scenario: body
                .get("scenario")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            status: "running".to_string(),
            agents,
            events: Vec::new(),
            next_event: 0,
            polls: 0,
            remaining_polls: self.faults.terminal_after_polls,
        };
        let response = simulation.to_json(&id, Vec::new());
        state.simulations.insert(id.clone(), simulation);
        state.emitted.insert(id, Vec::new());
        HttpResponse::json(201, &json!({ "simulation": response }))
    }

    fn poll(&self, id: &str) -> HttpResponse {
        let mut state = self.state();
        state.stats.polls += 1;
        let polls_so_far = state.stats.polls;

        if self.should_fail(&mut state, polls_so_far) {
            state.stats.injected_failures += 1;
            return HttpResponse::json(503, &json!({"detail": "Service Unavailable"}));
        }
        state.failure_streak = 0;

        let events_per_poll = self.faults.events_per_poll;
        let replay = self.faults.replay_duplicates;
        let MockState {
            simulations,
            emitted,
            ..
        } = &mut *state;
        let Some(sim) = simulations.get_mut(id) else {
            return HttpResponse::json(404, &json!({"detail": "Simulation not found"}));
        };

        sim.polls += 1;
        if sim.status == "running" {
            for i in 0..events_per_poll {
                let actor = AGENT_NAMES[(sim.next_event as usize + i) % AGENT_NAMES.len()];
                let event_id = sim.push_event(id, actor, format!("{} acts on turn {}", actor, sim.polls));
                emitted.entry(id.to_string()).or_default().push(event_id);
            }
            if sim.polls % NOISE_EVERY == 0 {
                sim.next_event += 1;
                let noise_id = format!("{}-n{}", id, sim.next_event);
                sim.events.push(json!({
                    "id": noise_id,
                    "actor": "System",
                    "summary": "Memory corrosion applied to Ada",
                }));
            }
            if let Some(remaining) = sim.remaining_polls.as_mut() {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    sim.status = "completed".to_string();
                }
            }
        }

        let mut events = sim.events.clone();
        if replay && !sim.events.is_empty() {
            let extra = self.ctx.with_rng(|rng| rng.gen_range(1..=3usize));
            for _ in 0..extra {
                let index = self.ctx.with_rng(|rng| rng.gen_range(0..sim.events.len()));
                events.push(sim.events[index].clone());
            }
        }
        HttpResponse::json(200, &json!({ "simulation": sim.to_json(id, events) }))
    }

    fn should_fail(&self, state: &mut MockState, polls_so_far: u64) -> bool {
        if self.faults.outage_after_polls.is_some_and(|after| polls_so_far > after) {
            return true;
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return true;
        }
        if self.faults.failure_rate > 0.0 && state.failure_streak < self.faults.max_failure_streak {
            let fail = self.ctx.with_rng(|rng| rng.gen_bool(self.faults.failure_rate));
            if fail {
                state.failure_streak += 1;
                return true;
            }
        }
        false
    }

    fn advance(&self, id: &str, request: &HttpRequest) -> HttpResponse {
        let steps = request
            .body
            .as_ref()
            .and_then(|body| body.get("steps"))
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;
        let mut state = self.state();
        let Some(sim) = state.simulations.get_mut(id) else {
            return HttpResponse::json(404, &json!({"detail": "Simulation not found"}));
        };
        sim.status = "running".to_string();
        sim.remaining_polls = Some(sim.remaining_polls.unwrap_or(0) + steps);
        HttpResponse::json(200, &sim.to_json(id, sim.events.clone()))
    }

    fn fate(&self, id: &str, request: &HttpRequest) -> HttpResponse {
        let prompt = request
            .body
            .as_ref()
            .and_then(|body| body.get("prompt"))
            .and_then(Value::as_str)
            .map(String::from);
        let mut state = self.state();
        let MockState {
            simulations,
            emitted,
            ..
        } = &mut *state;
        let Some(sim) = simulations.get_mut(id) else {
            return HttpResponse::json(404, &json!({"detail": "Simulation not found"}));
        };
        let twist = prompt.unwrap_or_else(|| "an unexpected storm".to_string());
        let event_id = sim.push_event(id, "Fate Weaver", format!("Fate intervenes: {}", twist));
        emitted.entry(id.to_string()).or_default().push(event_id);
        sim.status = "running".to_string();
        sim.remaining_polls = Some(sim.remaining_polls.unwrap_or(0) + 1);
        HttpResponse::json(200, &json!({ "simulation": sim.to_json(id, sim.events.clone()) }))
    }
}

#[async_trait]
impl HttpTransport for MockBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EnvError> {
        let is_poll = request.method == Method::Get && request.path().starts_with("/simulations/");
        {
            let mut state = self.state();
            state.stats.requests += 1;
            if is_poll {
                state.concurrent_polls += 1;
                state.stats.max_concurrent_polls =
                    state.stats.max_concurrent_polls.max(state.concurrent_polls);
            }
        }

        if is_poll {
            self.simulate_latency().await;
        }
        let response = self.route(&request);

        if is_poll {
            self.state().concurrent_polls -= 1;
        }
        tracing::trace!(
            method = %request.method,
            path = request.path(),
            status = response.status,
            "mock backend served request"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(faults: MockFaults) -> MockBackend {
        MockBackend::new(SimContext::shared(7), faults)
    }

    fn authed(method: Method, path: &str, token: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, format!("http://mock{}", path));
        request.set_header("Authorization", format!("Bearer {}", token));
        request
    }

    #[tokio::test]
    async fn test_rejects_missing_token() {
        let mock = backend(MockFaults::default());
        let response = mock
            .send(HttpRequest::new(Method::Get, "http://mock/simulations/sim-1"))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(mock.stats().unauthorized, 1);
    }

    #[tokio::test]
    async fn test_poll_emits_events_and_completes() {
        let mock = backend(MockFaults {
            events_per_poll: 2,
            terminal_after_polls: Some(2),
            ..MockFaults::default()
        });
        let created = mock
            .send(authed(Method::Post, "/simulations", "access-0").with_json(json!({"scenario": "x"})))
            .await
            .unwrap();
        let body: Value = created.json_body().unwrap();
        let id = body["simulation"]["id"].as_str().unwrap().to_string();

        let first: Value = mock
            .send(authed(Method::Get, &format!("/simulations/{}", id), "access-0"))
            .await
            .unwrap()
            .json_body()
            .unwrap();
        let second: Value = mock
            .send(authed(Method::Get, &format!("/simulations/{}", id), "access-0"))
            .await
            .unwrap()
            .json_body()
            .unwrap();

        assert_eq!(first["simulation"]["status"], "running");
        assert_eq!(second["simulation"]["status"], "completed");
        assert_eq!(second["simulation"]["events"].as_array().unwrap().len(), 4);
        assert_eq!(mock.emitted_event_ids(&id).len(), 4);
    }

    #[tokio::test]
    async fn test_fail_next_injects_503() {
        let mock = backend(MockFaults::default());
        mock.fail_next(1);
        let response = mock
            .send(authed(Method::Get, "/simulations/sim-9", "access-0"))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(mock.stats().injected_failures, 1);
    }

    #[tokio::test]
    async fn test_refresh_issues_current_token() {
        let mock = backend(MockFaults::default());
        mock.expire_access_token();

        let mut refresh = HttpRequest::new(Method::Post, "http://mock/auth/refresh");
        refresh.set_header("Authorization", "Bearer refresh-token");
        let body: Value = mock.send(refresh.clone()).await.unwrap().json_body().unwrap();
        assert_eq!(body["access_token"], "access-1");

        mock.revoke_refresh_token();
        assert_eq!(mock.send(refresh).await.unwrap().status, 401);
    }
}
