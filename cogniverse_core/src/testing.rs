//! Scripted doubles shared by the unit tests.

use async_trait::async_trait;
use cogniverse_env::{EnvError, HttpRequest, HttpResponse, HttpTransport};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::ApiError;
use crate::payload::SimulationPayload;
use crate::poller::SimulationBackend;

/// Transport that replays queued responses and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, EnvError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: HttpResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(EnvError::transport(message)));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, EnvError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(EnvError::transport("no scripted response")))
    }
}

/// Backend double. An empty `get` queue fails every call.
#[derive(Default)]
pub struct ScriptedBackend {
    gets: Mutex<VecDeque<Result<Value, ApiError>>>,
    creates: Mutex<VecDeque<Result<Value, ApiError>>>,
    pub created: Mutex<Vec<SimulationPayload>>,
    pub advanced: Mutex<Vec<(String, u32)>>,
    pub fates: Mutex<Vec<(String, Option<String>)>>,
    gate: Mutex<Option<Arc<Notify>>>,
    get_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_get(&self, response: Result<Value, ApiError>) {
        self.gets.lock().unwrap().push_back(response);
    }

    pub fn push_create(&self, response: Result<Value, ApiError>) {
        self.creates.lock().unwrap().push_back(response);
    }

    /// Makes `get_simulation` wait until the returned handle is notified.
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimulationBackend for ScriptedBackend {
    async fn create_simulation(&self, payload: &SimulationPayload) -> Result<Value, ApiError> {
        self.created.lock().unwrap().push(payload.clone());
        self.creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("no scripted create".into())))
    }

    async fn get_simulation(&self, _id: &str) -> Result<Value, ApiError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.gets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("no scripted poll".into())))
    }

    async fn advance_simulation(&self, id: &str, steps: u32) -> Result<Value, ApiError> {
        self.advanced.lock().unwrap().push((id.to_string(), steps));
        Ok(Value::Null)
    }

    async fn trigger_fate(&self, id: &str, prompt: Option<&str>) -> Result<Value, ApiError> {
        self.fates
            .lock()
            .unwrap()
            .push((id.to_string(), prompt.map(String::from)));
        Ok(Value::Null)
    }
}
