//! Data side of the simulation log views.
//!
//! Raw backend events are mapped into display entries, agents without a
//! recent utterance get a fallback line, and per-agent state snapshots are
//! collected into a de-duplicated timeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::normalize::{SimAgent, Simulation};

const WHO_KEYS: [&str; 5] = ["actor", "agent", "agent_name", "agentName", "who"];
const TURN_KEYS: [&str; 5] = ["turn", "round", "step", "sequence", "counter"];
const TEXT_KEYS: [&str; 5] = ["text", "content", "message", "summary", "description"];
const TIME_KEYS: [&str; 4] = ["timestamp", "time", "created_at", "createdAt"];
const TYPE_KEYS: [&str; 3] = ["type", "event_type", "category"];
const DIRECT_AGENT_ID_KEYS: [&str; 8] = [
    "actor_id",
    "actorId",
    "agent_id",
    "agentId",
    "agent_uuid",
    "agentUuid",
    "subject_id",
    "subjectId",
];
const AGENT_ID_KEYS: [&str; 12] = [
    "id",
    "agent_id",
    "agentId",
    "agent_uuid",
    "agentUuid",
    "agentid",
    "project_agent_id",
    "projectagentid",
    "projectAgentId",
    "projectAgentID",
    "external_id",
    "externalId",
];
const SPEECH_KEYS: [&str; 14] = [
    "last_action",
    "lastAction",
    "current_action",
    "currentAction",
    "state_description",
    "stateDescription",
    "activity",
    "status",
    "summary",
    "description",
    "last_action_text",
    "note",
    "observation",
    "agenda",
];

/// Non-empty list entries, or a single trimmed string, else nothing.
pub fn ensure_string_array(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(truthy_string).collect(),
        Value::String(text) if !text.trim().is_empty() => vec![text.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Lowercased trimmed name for matching, `None` when blank.
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Finite numbers and numeric strings.
pub fn to_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Every distinct id an agent record is known by, in key order.
pub fn gather_agent_ids(agent: &Value) -> Vec<String> {
    if !agent.is_object() {
        return Vec::new();
    }
    let mut seen = HashSet::new();
    AGENT_ID_KEYS
        .iter()
        .filter_map(|key| agent.get(*key).and_then(scalar_string))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// One display row of the simulation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub who: String,
    pub turn: u64,
    pub text: String,
    pub agent_id: Option<String>,
    pub kind: Option<String>,
    pub timestamp: Option<String>,
    pub is_system: bool,
}

/// Maps raw events to log entries. Entries without text are dropped.
pub fn map_events_to_logs(events: &[Value]) -> Vec<LogEntry> {
    events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| {
            let text = first_present(event, &TEXT_KEYS)
                .map(display_string)
                .unwrap_or_default();
            if text.is_empty() {
                return None;
            }

            let who = first_present(event, &WHO_KEYS)
                .map(|value| match value {
                    Value::Object(_) => value
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("System")
                        .to_string(),
                    other => display_string(other),
                })
                .unwrap_or_else(|| "System".to_string());

            let turn = first_present(event, &TURN_KEYS)
                .and_then(to_numeric)
                .map(|n| n.max(0.0) as u64)
                .unwrap_or(index as u64 + 1);

            let agent_id = DIRECT_AGENT_ID_KEYS
                .iter()
                .filter_map(|key| event.get(*key))
                .find_map(scalar_string)
                .or_else(|| {
                    ["actor", "agent", "subject"]
                        .iter()
                        .filter_map(|key| event.get(*key))
                        .flat_map(gather_agent_ids)
                        .next()
                });

            let kind = TYPE_KEYS
                .iter()
                .filter_map(|key| event.get(*key).and_then(Value::as_str))
                .find(|kind| !kind.is_empty())
                .map(String::from);

            let normalized_kind = kind.as_deref().map(str::to_lowercase);
            let is_system = matches!(normalized_kind.as_deref(), Some("system" | "simulation"))
                || normalize_name(&who).as_deref() == Some("system");

            let id = event
                .get("id")
                .and_then(scalar_string)
                .unwrap_or_else(|| format!("{}-{}-{}", who, turn, index));

            Some(LogEntry {
                id,
                who,
                turn,
                text,
                agent_id,
                kind,
                timestamp: first_present(event, &TIME_KEYS).map(display_string),
                is_system,
            })
        })
        .collect()
}

/// A line to show for an agent that has not spoken recently.
pub fn fallback_speech_for_agent(agent: Option<&Value>, display_name: Option<&str>) -> String {
    let waiting = || match display_name.filter(|name| !name.is_empty()) {
        Some(name) => format!("{} is awaiting their next move.", name),
        None => "Awaiting next move.".to_string(),
    };

    let Some(agent) = agent.filter(|a| !a.is_null()) else {
        return waiting();
    };

    let spoken = SPEECH_KEYS
        .iter()
        .filter_map(|key| agent.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty());
    if let Some(text) = spoken {
        return text.to_string();
    }

    match agent.get("simAgent") {
        Some(nested) if nested.is_object() && nested != agent => {
            fallback_speech_for_agent(Some(nested), display_name)
        }
        _ => waiting(),
    }
}

/// The latest line per agent, keyed by id and by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBubbles {
    pub by_id: BTreeMap<String, Bubble>,
    pub by_name: BTreeMap<String, Bubble>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    pub text: String,
    pub turn: Option<u64>,
    pub who: String,
}

impl AgentBubbles {
    /// Latest non-system log line per agent; agents with no line get their
    /// fallback speech.
    pub fn collect(entries: &[LogEntry], agents: &[Value]) -> Self {
        let mut bubbles = Self::default();

        for entry in entries.iter().filter(|e| !e.is_system) {
            let bubble = Bubble {
                text: entry.text.clone(),
                turn: Some(entry.turn),
                who: entry.who.clone(),
            };
            if let Some(agent_id) = &entry.agent_id {
                bubbles.by_id.insert(agent_id.clone(), bubble.clone());
            }
            if let Some(key) = normalize_name(&entry.who) {
                bubbles.by_name.insert(key, bubble);
            }
        }

        for (index, agent) in agents.iter().enumerate() {
            let display_name = ["name", "agent_name", "agentname"]
                .iter()
                .find_map(|key| agent.get(*key).and_then(Value::as_str))
                .map(String::from)
                .unwrap_or_else(|| format!("Agent {}", index + 1));
            let bubble = Bubble {
                text: fallback_speech_for_agent(Some(agent), Some(&display_name)),
                turn: ["turn_count", "turnCount"]
                    .iter()
                    .find_map(|key| agent.get(*key).and_then(Value::as_u64)),
                who: display_name.clone(),
            };
            for id in gather_agent_ids(agent) {
                bubbles.by_id.entry(id).or_insert_with(|| bubble.clone());
            }
            if let Some(key) = normalize_name(&display_name) {
                bubbles.by_name.entry(key).or_insert(bubble);
            }
        }

        bubbles
    }
}

/// Emotional and memory state of one agent at one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub emotion: String,
    pub memory: String,
    pub corrosion: String,
}

impl AgentSnapshot {
    pub fn of(agent: &SimAgent) -> Self {
        Self {
            emotion: agent
                .emotional_state
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "neutral".to_string()),
            memory: joined_or_none(&agent.memory),
            corrosion: joined_or_none(&agent.corroded_memory),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Milliseconds since the Unix epoch
    pub observed_at_ms: u64,
    #[serde(flatten)]
    pub snapshot: AgentSnapshot,
}

/// Per-agent cognitive log. Consecutive identical snapshots are collapsed.
#[derive(Debug, Clone, Default)]
pub struct AgentTimeline {
    ids: Vec<String>,
    names: Vec<String>,
    entries: Vec<TimelineEntry>,
}

impl AgentTimeline {
    /// Tracks the agent identified by `agent` (`id`/`agentid`, `name`/`agentname`).
    pub fn for_agent(agent: &Value) -> Self {
        let collect = |keys: [&str; 2]| {
            keys.iter()
                .filter_map(|key| agent.get(*key).and_then(scalar_string))
                .collect::<Vec<_>>()
        };
        Self {
            ids: collect(["id", "agentid"]),
            names: collect(["name", "agentname"]),
            entries: Vec::new(),
        }
    }

    fn matches(&self, agent: &SimAgent) -> bool {
        agent.id.as_ref().is_some_and(|id| self.ids.contains(id))
            || agent.name.as_ref().is_some_and(|name| self.names.contains(name))
    }

    /// Records the tracked agent's state. Returns true when a row was added.
    pub fn observe(&mut self, simulation: &Simulation, observed_at_ms: u64) -> bool {
        let Some(agent) = simulation.agents.iter().find(|a| self.matches(a)) else {
            return false;
        };
        let snapshot = AgentSnapshot::of(agent);
        if self.entries.last().map(|last| &last.snapshot) == Some(&snapshot) {
            return false;
        }
        self.entries.push(TimelineEntry {
            observed_at_ms,
            snapshot,
        });
        true
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }
}

fn joined_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn first_present<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|v| !v.is_null())
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_simulation;
    use serde_json::json;

    #[test]
    fn test_ensure_string_array() {
        assert_eq!(ensure_string_array(&json!(["a", "", null, "b"])), vec!["a", "b"]);
        assert_eq!(ensure_string_array(&json!("  solo ")), vec!["solo"]);
        assert!(ensure_string_array(&json!("   ")).is_empty());
        assert!(ensure_string_array(&json!(3)).is_empty());
    }

    #[test]
    fn test_to_numeric() {
        assert_eq!(to_numeric(&json!(4)), Some(4.0));
        assert_eq!(to_numeric(&json!("2.5")), Some(2.5));
        assert_eq!(to_numeric(&json!("abc")), None);
        assert_eq!(to_numeric(&json!(null)), None);
    }

    #[test]
    fn test_gather_agent_ids_dedupes() {
        let ids = gather_agent_ids(&json!({"id": 3, "agentid": "3", "external_id": "x"}));
        assert_eq!(ids, vec!["3", "x"]);
        assert!(gather_agent_ids(&json!("nope")).is_empty());
    }

    #[test]
    fn test_map_events_to_logs_fallbacks() {
        let events = vec![
            json!({"agent_name": "Ada", "content": "Hello", "round": 2, "agentId": 11}),
            json!({"summary": ""}),
            json!({"message": "Tick", "type": "System"}),
            json!({"text": "Hi", "actor": {"name": "Bob", "agent_uuid": "b-1"}}),
        ];

        let logs = map_events_to_logs(&events);

        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].who, "Ada");
        assert_eq!(logs[0].turn, 2);
        assert_eq!(logs[0].agent_id.as_deref(), Some("11"));
        assert_eq!(logs[0].id, "Ada-2-0");
        assert!(!logs[0].is_system);

        assert_eq!(logs[1].who, "System");
        assert_eq!(logs[1].turn, 3);
        assert!(logs[1].is_system);

        assert_eq!(logs[2].who, "Bob");
        assert_eq!(logs[2].agent_id.as_deref(), Some("b-1"));
    }

    #[test]
    fn test_fallback_speech() {
        assert_eq!(fallback_speech_for_agent(None, None), "Awaiting next move.");
        assert_eq!(
            fallback_speech_for_agent(Some(&json!({})), Some("Ada")),
            "Ada is awaiting their next move."
        );
        assert_eq!(
            fallback_speech_for_agent(Some(&json!({"activity": "  reading  "})), Some("Ada")),
            "reading"
        );
        assert_eq!(
            fallback_speech_for_agent(Some(&json!({"simAgent": {"note": "nested"}})), None),
            "nested"
        );
    }

    #[test]
    fn test_bubbles_prefer_log_lines() {
        let entries = map_events_to_logs(&[json!({"actor": "Ada", "text": "Go!", "agent_id": "a1"})]);
        let agents = vec![
            json!({"id": "a1", "name": "Ada", "last_action": "idle"}),
            json!({"id": "b1", "name": "Bob", "last_action": "thinking"}),
        ];

        let bubbles = AgentBubbles::collect(&entries, &agents);

        assert_eq!(bubbles.by_id["a1"].text, "Go!");
        assert_eq!(bubbles.by_id["b1"].text, "thinking");
        assert_eq!(bubbles.by_name["bob"].who, "Bob");
    }

    #[test]
    fn test_timeline_skips_consecutive_duplicates() {
        let mut timeline = AgentTimeline::for_agent(&json!({"agentid": "a1", "agentname": "Ada"}));
        let calm = normalize_simulation(&json!({
            "agents": [{"id": "a1", "name": "Ada", "emotional_state": "calm", "memory": ["m1"]}]
        }));
        let angry = normalize_simulation(&json!({
            "agents": [{"id": "a1", "name": "Ada", "emotional_state": "angry", "memory": ["m1"]}]
        }));

        assert!(timeline.observe(&calm, 1));
        assert!(!timeline.observe(&calm, 2));
        assert!(timeline.observe(&angry, 3));
        assert!(timeline.observe(&calm, 4));

        let entries = timeline.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].snapshot.memory, "m1");
        assert_eq!(entries[0].snapshot.corrosion, "none");
    }

    #[test]
    fn test_timeline_ignores_unknown_agent() {
        let mut timeline = AgentTimeline::for_agent(&json!({"id": "zz"}));
        let sim = normalize_simulation(&json!({"agents": [{"id": "a1"}]}));
        assert!(!timeline.observe(&sim, 0));
        assert!(timeline.entries().is_empty());
    }
}
