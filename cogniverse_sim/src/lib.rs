//! CogniVerse Deterministic Simulation Harness
//!
//! Runs the real client stack (API client, token refresh, simulation
//! poller, session manager) against an in-process mock backend on a
//! virtual clock. Every run is reproducible from a single 64-bit seed.
//!
//! - **Time**: [`SimContext`] advances a virtual clock instead of sleeping
//! - **Backend**: [`MockBackend`] implements the HTTP transport and injects
//!   latency, 503s, outages and token rotation
//! - **Randomness**: all entropy comes from the context's seeded RNG
//!
//! # Usage
//!
//! ```ignore
//! use cogniverse_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Outage);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod mock;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use mock::{MockBackend, MockFaults, MockStats};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
