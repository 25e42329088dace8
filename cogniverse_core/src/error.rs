//! Error types for the CogniVerse client.

use cogniverse_env::EnvError;
use thiserror::Error;

/// Errors returned by the API client and endpoint calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),

    /// The backend answered with a non-2xx status
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Token storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The client configuration could not be read or is invalid
    #[error("Config error: {0}")]
    Config(String),
}

impl ApiError {
    /// Returns the HTTP status, if the backend produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Errors from the simulation session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Please enter a scenario description first")]
    EmptyScenario,

    #[error("Finish or clear the current simulation before starting a new one")]
    SimulationInProgress,

    #[error("Select at least one agent to run the simulation")]
    NoAgents,

    #[error("No active simulation")]
    NoActiveSimulation,

    #[error("Simulation identifier missing from response")]
    MissingSimulationId,

    #[error(transparent)]
    Api(#[from] ApiError),
}
