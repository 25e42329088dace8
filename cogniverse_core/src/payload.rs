//! Request body for `POST /simulations`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logs::ensure_string_array;

/// The backend runs at most this many agents per simulation.
pub const MAX_AGENTS: usize = 5;

const PROFILES_HEADER: &str = "=== Agent Profiles ===";
const PROFILES_FOOTER: &str = "======================";
const UNTITLED: &str = "Untitled Simulation";

/// One structured agent slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomAgent {
    pub slot: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognitive_bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_process: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivation: Option<String>,
    pub skills: Vec<String>,
    pub constraints: Vec<String>,
    pub quirks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
}

impl CustomAgent {
    /// Reads an agent record, preferring the `agent*` column names.
    pub fn from_record(slot: usize, record: &Value) -> Self {
        Self {
            slot,
            name: pick(record, "agentname", "name").unwrap_or_else(|| format!("Agent {}", slot + 1)),
            role: pick(record, "agentrole", "role"),
            persona: pick(record, "agentpersonality", "persona"),
            cognitive_bias: pick(record, "agentbias", "cognitive_bias"),
            emotional_state: pick(record, "agentemotion", "emotional_state"),
            thought_process: record
                .get("thought_process")
                .filter(|value| !value.is_null())
                .cloned(),
            mbti: pick(record, "agentmbti", "mbti"),
            motivation: pick(record, "agentmotivation", "motivation"),
            skills: pick_list(record, "agentskill", "skills"),
            constraints: pick_list(record, "agentconstraints", "constraints"),
            quirks: pick_list(record, "agentquirk", "quirks"),
            biography: pick(record, "agentbiography", "biography"),
        }
    }

    /// Human-readable trait block; empty traits are omitted.
    pub fn profile_block(&self) -> String {
        let mut lines = vec![format!("Agent {}: {}", self.slot + 1, self.name)];
        let mut push = |label: &str, value: &Option<String>| {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                lines.push(format!("{}: {}", label, value));
            }
        };
        push("Role", &self.role);
        push("Persona", &self.persona);
        push("MBTI", &self.mbti);
        push("Motivation", &self.motivation);
        let skills = joined(&self.skills);
        let quirks = joined(&self.quirks);
        let constraints = joined(&self.constraints);
        push("Skills", &skills);
        push("Quirks", &quirks);
        push("Biography", &self.biography);
        push("Constraints", &constraints);
        push("Current Emotion", &self.emotional_state);
        push("Cognitive Bias", &self.cognitive_bias);
        lines.join("\n")
    }
}

/// Body of a create-simulation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationPayload {
    /// Agent profiles merged ahead of the scenario text
    pub scenario: String,
    pub custom_agents: Vec<CustomAgent>,
}

impl SimulationPayload {
    /// Builds the payload from the scenario text and the selected agents.
    ///
    /// Agents beyond [`MAX_AGENTS`] are ignored.
    pub fn build(scenario_text: &str, agents: &[Value]) -> Self {
        let custom_agents: Vec<CustomAgent> = agents
            .iter()
            .take(MAX_AGENTS)
            .enumerate()
            .map(|(slot, record)| CustomAgent::from_record(slot, record))
            .collect();

        let profiles = custom_agents
            .iter()
            .map(CustomAgent::profile_block)
            .collect::<Vec<_>>()
            .join("\n\n");

        let trimmed = scenario_text.trim();
        let scenario = [
            PROFILES_HEADER,
            profiles.as_str(),
            PROFILES_FOOTER,
            if trimmed.is_empty() { UNTITLED } else { trimmed },
        ]
        .join("\n\n");

        Self {
            scenario,
            custom_agents,
        }
    }
}

fn pick(record: &Value, primary: &str, fallback: &str) -> Option<String> {
    [primary, fallback]
        .iter()
        .find_map(|key| match record.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
}

fn pick_list(record: &Value, primary: &str, fallback: &str) -> Vec<String> {
    let value = record
        .get(primary)
        .filter(|v| !v.is_null())
        .or_else(|| record.get(fallback));
    value.map(ensure_string_array).unwrap_or_default()
}

fn joined(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}
