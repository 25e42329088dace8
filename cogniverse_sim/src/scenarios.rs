//! Scenario catalogue for the polling harness.

use serde::Serialize;

/// Identifies a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// Healthy backend streaming events until completion
    SteadyStream,

    /// Responses replay old events, including within one payload
    DuplicateReplay,

    /// Simulation completes early; polling must stay stopped
    TerminalStop,

    /// Random 503s, never enough in a row to hit the cap
    FlakyBackend,

    /// Backend goes down for good mid-run
    Outage,

    /// Access token rotates underneath the client
    TokenExpiry,

    /// Responses slower than the poll interval
    SlowBackend,

    /// Completed run resumed with advance and fate
    AdvanceResume,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyStream,
            ScenarioId::DuplicateReplay,
            ScenarioId::TerminalStop,
            ScenarioId::FlakyBackend,
            ScenarioId::Outage,
            ScenarioId::TokenExpiry,
            ScenarioId::SlowBackend,
            ScenarioId::AdvanceResume,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "steady_stream",
            ScenarioId::DuplicateReplay => "duplicate_replay",
            ScenarioId::TerminalStop => "terminal_stop",
            ScenarioId::FlakyBackend => "flaky_backend",
            ScenarioId::Outage => "outage",
            ScenarioId::TokenExpiry => "token_expiry",
            ScenarioId::SlowBackend => "slow_backend",
            ScenarioId::AdvanceResume => "advance_resume",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "Events arrive every poll; every id is logged exactly once",
            ScenarioId::DuplicateReplay => "Old events are replayed; the log never repeats an id",
            ScenarioId::TerminalStop => "Terminal status stops the loop and no request follows",
            ScenarioId::FlakyBackend => "Intermittent 503s are retried until completion",
            ScenarioId::Outage => "Five consecutive failures stop the loop for good",
            ScenarioId::TokenExpiry => "401s trigger a single refresh and a single retry",
            ScenarioId::SlowBackend => "Slow responses never overlap a second poll",
            ScenarioId::AdvanceResume => "Advance and fate restart polling without losing the log",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "steady_stream" | "steady" => Ok(ScenarioId::SteadyStream),
            "duplicate_replay" | "duplicates" => Ok(ScenarioId::DuplicateReplay),
            "terminal_stop" | "terminal" => Ok(ScenarioId::TerminalStop),
            "flaky_backend" | "flaky" => Ok(ScenarioId::FlakyBackend),
            "outage" => Ok(ScenarioId::Outage),
            "token_expiry" | "token" => Ok(ScenarioId::TokenExpiry),
            "slow_backend" | "slow" => Ok(ScenarioId::SlowBackend),
            "advance_resume" | "resume" => Ok(ScenarioId::AdvanceResume),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("Slow-Backend".parse::<ScenarioId>(), Ok(ScenarioId::SlowBackend));
        assert_eq!("flaky".parse::<ScenarioId>(), Ok(ScenarioId::FlakyBackend));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
