//! CogniVerse Core - client for the CogniVerse simulation platform
//!
//! This library covers everything the platform frontend does beyond drawing
//! pixels:
//! 1. **Authenticated API client**: bearer tokens with refresh-on-401 retry
//! 2. **Endpoint surface**: one typed call per backend route
//! 3. **Simulation polling**: at-most-one-in-flight poll loop with event
//!    de-duplication, terminal-status stop and a consecutive-failure cap
//! 4. **Session management**: create/advance/fate/reset lifecycle

pub mod api_client;
pub mod auth;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod logs;
pub mod normalize;
pub mod payload;
pub mod permission;
pub mod poller;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use api_client::ApiClient;
pub use auth::{MemoryTokenStore, SledTokenStore, TokenClaims, TokenStore};
pub use config::ClientConfig;
pub use endpoints::{ListInput, NewAgent};
pub use error::{ApiError, SessionError};
pub use logs::{AgentTimeline, LogEntry};
pub use normalize::{SimAgent, SimEvent, Simulation};
pub use payload::SimulationPayload;
pub use permission::{Permission, PermissionLevel};
pub use poller::{
    PollEvent, PollSnapshot, PollerConfig, SimulationBackend, SimulationPoller, StopReason,
    TickOutcome,
};
pub use session::{HistoryEntry, SimulationSession};
