//! Normalized view of backend simulation payloads.
//!
//! The backend is loose about field names and shapes (lists vs. newline
//! strings, several id keys, optional wrappers). Everything is folded into
//! the typed records below before the poller or the session touch it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Statuses after which a simulation never changes again.
pub const TERMINAL_STATUSES: [&str; 7] = [
    "completed",
    "failed",
    "errored",
    "error",
    "cancelled",
    "canceled",
    "stopped",
];

/// Keys tried, in order, when resolving a simulation id.
const ID_KEYS: [&str; 5] = ["id", "simulation_id", "simulationId", "uuid", "identifier"];

/// Event texts containing these markers are backend filler.
const NOISE_MARKERS: [&str; 2] = ["memory corrosion applied", "internal reasoning"];

/// Case-insensitive terminal status check.
pub fn is_terminal(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    TERMINAL_STATUSES.contains(&status.as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub facing: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimAgent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub emotional_state: Option<String>,
    pub last_action: Option<String>,
    pub turn_count: u64,
    pub memory: Vec<String>,
    pub thought_process: Vec<String>,
    pub corroded_memory: Vec<String>,
    pub position: Position,
    pub mbti: Option<String>,
    pub motivation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub id: String,
    /// Backend `type`, `"agent"` when absent
    pub kind: String,
    pub actor: String,
    pub text: String,
    /// Absent timestamps stay absent
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    pub id: Option<String>,
    pub scenario: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub active_agent_index: Option<u64>,
    pub agents: Vec<SimAgent>,
    pub events: Vec<SimEvent>,
}

impl Simulation {
    pub fn is_terminal(&self) -> bool {
        self.status.as_deref().map(is_terminal).unwrap_or(false)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&SimAgent> {
        self.agents
            .iter()
            .find(|agent| agent.id.as_deref() == Some(agent_id))
    }

    /// Memory lines of one agent, empty when the agent is unknown.
    pub fn agent_memory(&self, agent_id: &str) -> &[String] {
        self.agent(agent_id)
            .map(|agent| agent.memory.as_slice())
            .unwrap_or(&[])
    }

    pub fn agent_position(&self, agent_id: &str) -> Option<&Position> {
        self.agent(agent_id).map(|agent| &agent.position)
    }
}

/// Strips the optional `{ "simulation": {...} }` wrapper.
pub fn unwrap_simulation(response: &Value) -> &Value {
    match response.get("simulation") {
        Some(inner) if inner.is_object() => inner,
        _ => response,
    }
}

/// Resolves the id from the first present id key; numbers are stringified.
pub fn simulation_id(raw: &Value) -> Option<String> {
    let raw = unwrap_simulation(raw);
    ID_KEYS
        .iter()
        .filter_map(|key| raw.get(*key))
        .find_map(scalar_string)
}

/// Normalizes a raw (optionally wrapped) simulation response.
pub fn normalize_simulation(response: &Value) -> Simulation {
    let raw = unwrap_simulation(response);
    let empty = Vec::new();
    let agents = raw
        .get("agents")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let events = raw
        .get("events")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    Simulation {
        id: simulation_id(raw),
        scenario: string_field(raw, "scenario"),
        status: string_field(raw, "status"),
        created_at: string_field(raw, "created_at"),
        updated_at: string_field(raw, "updated_at"),
        active_agent_index: raw.get("active_agent_index").and_then(Value::as_u64),
        agents: agents.iter().map(normalize_agent).collect(),
        events: normalize_events(events),
    }
}

fn normalize_agent(raw: &Value) -> SimAgent {
    SimAgent {
        id: raw.get("id").and_then(scalar_string),
        name: string_field(raw, "name"),
        role: string_field(raw, "role"),
        emotional_state: string_field(raw, "emotional_state"),
        last_action: string_field(raw, "last_action"),
        turn_count: raw.get("turn_count").and_then(Value::as_u64).unwrap_or(0),
        memory: line_list(raw.get("memory")),
        thought_process: line_list(raw.get("thought_process")),
        corroded_memory: line_list(raw.get("corroded_memory")),
        position: match raw.get("position") {
            Some(pos) if pos.is_object() => normalize_position(pos),
            _ => Position::default(),
        },
        mbti: string_field(raw, "mbti").or_else(|| string_field(raw, "persona")),
        motivation: string_field(raw, "motivation"),
    }
}

/// Drops filler events and flattens the rest.
///
/// Synthetic ids (`evt-{i}`) index into the filtered list.
pub fn normalize_events(events: &[Value]) -> Vec<SimEvent> {
    events
        .iter()
        .filter(|event| {
            let text = event_text(event).to_lowercase();
            !text.is_empty() && !NOISE_MARKERS.iter().any(|marker| text.contains(marker))
        })
        .enumerate()
        .map(|(i, event)| SimEvent {
            id: event
                .get("id")
                .and_then(scalar_string)
                .unwrap_or_else(|| format!("evt-{}", i)),
            kind: string_field(event, "type").unwrap_or_else(|| "agent".to_string()),
            actor: string_field(event, "actor")
                .or_else(|| string_field(event, "actor_name"))
                .unwrap_or_else(|| "System".to_string()),
            text: event_text(event).to_string(),
            timestamp: string_field(event, "timestamp"),
        })
        .collect()
}

/// Scales backend coordinates into canvas space.
pub fn normalize_position(pos: &Value) -> Position {
    let x = pos.get("x").and_then(to_f64).unwrap_or(f64::NAN);
    let y = pos.get("y").and_then(to_f64).unwrap_or(f64::NAN);
    let facing = pos.get("facing").filter(|f| !f.is_null()).cloned();

    if (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y) {
        return Position {
            x: 100.0 + x * 500.0,
            y: 100.0 + y * 400.0,
            facing,
        };
    }
    if x < 50.0 && y < 50.0 {
        return Position {
            x: 200.0 + x * 10.0,
            y: 200.0 + y * 10.0,
            facing,
        };
    }
    Position { x, y, facing }
}

/// `summary` when present, even if empty; `text` only when it is absent.
fn event_text(event: &Value) -> &str {
    event
        .get("summary")
        .and_then(Value::as_str)
        .or_else(|| event.get("text").and_then(Value::as_str))
        .unwrap_or("")
}

/// Lists pass through; strings are split on newlines. Empty entries dropped.
fn line_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::String(_) | Value::Null | Value::Bool(false) => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(text)) => text
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(String::from)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_status_case_insensitive() {
        assert!(is_terminal("COMPLETED"));
        assert!(is_terminal("Canceled"));
        assert!(is_terminal("stopped"));
        assert!(!is_terminal("running"));
        assert!(!is_terminal("pending"));
    }

    #[test]
    fn test_simulation_id_fallbacks() {
        assert_eq!(simulation_id(&json!({"id": "abc"})).as_deref(), Some("abc"));
        assert_eq!(simulation_id(&json!({"simulationId": 42})).as_deref(), Some("42"));
        assert_eq!(
            simulation_id(&json!({"simulation": {"uuid": "u-1"}})).as_deref(),
            Some("u-1")
        );
        assert_eq!(simulation_id(&json!({"status": "running"})), None);
    }

    #[test]
    fn test_event_filtering_and_ids() {
        let events = vec![
            json!({"summary": "Memory Corrosion Applied to Bob"}),
            json!({"text": "Ada speaks", "actor": "Ada"}),
            json!({"text": ""}),
            json!({"id": "e9", "summary": "Bob waves", "actor_name": "Bob", "type": "action"}),
            json!({"text": "internal reasoning trace"}),
        ];

        let out = normalize_events(&events);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "evt-0");
        assert_eq!(out[0].actor, "Ada");
        assert_eq!(out[0].kind, "agent");
        assert_eq!(out[0].timestamp, None);
        assert_eq!(out[1].id, "e9");
        assert_eq!(out[1].actor, "Bob");
        assert_eq!(out[1].kind, "action");
    }

    #[test]
    fn test_summary_wins_over_text_even_when_empty() {
        let events = vec![
            json!({"summary": "", "text": "Ada speaks"}),
            json!({"summary": null, "text": "Bob waves"}),
            json!({"summary": "Carol nods", "text": "ignored"}),
        ];

        let out = normalize_events(&events);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "Bob waves");
        assert_eq!(out[0].id, "evt-0");
        assert_eq!(out[1].text, "Carol nods");
    }

    #[test]
    fn test_event_without_actor_is_system() {
        let out = normalize_events(&[json!({"summary": "Tick"})]);
        assert_eq!(out[0].actor, "System");
    }

    #[test]
    fn test_position_scaling() {
        let unit = normalize_position(&json!({"x": 0.5, "y": 1.0}));
        assert_eq!((unit.x, unit.y), (350.0, 500.0));

        let small = normalize_position(&json!({"x": 10, "y": 20, "facing": "north"}));
        assert_eq!((small.x, small.y), (300.0, 400.0));
        assert_eq!(small.facing, Some(json!("north")));

        let large = normalize_position(&json!({"x": 320, "y": 240}));
        assert_eq!((large.x, large.y), (320.0, 240.0));
    }

    #[test]
    fn test_agent_normalization() {
        let sim = normalize_simulation(&json!({
            "simulation": {
                "id": 7,
                "status": "running",
                "agents": [{
                    "id": "a1",
                    "name": "Ada",
                    "memory": "first\n\nsecond",
                    "thought_process": ["x", ""],
                    "persona": "INTJ",
                    "position": "somewhere"
                }],
                "events": []
            }
        }));

        assert_eq!(sim.id.as_deref(), Some("7"));
        let agent = &sim.agents[0];
        assert_eq!(agent.memory, vec!["first", "second"]);
        assert_eq!(agent.thought_process, vec!["x"]);
        assert_eq!(agent.mbti.as_deref(), Some("INTJ"));
        assert_eq!(agent.turn_count, 0);
        assert_eq!(agent.position, Position::default());
        assert_eq!(sim.agent_memory("a1").len(), 2);
        assert!(sim.agent_memory("missing").is_empty());
        assert!(!sim.is_terminal());
    }
}
