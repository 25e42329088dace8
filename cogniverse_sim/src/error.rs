//! Error types for the simulation harness.

use cogniverse_core::{ApiError, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Invalid duration: {0}s (must be finite and positive)")]
    InvalidDuration(f64),

    #[error("Timed out after {0:.1}s of virtual time")]
    Timeout(f64),

    #[error("Assertion failed: {0}")]
    Assertion(String),
}

/// Fails with an assertion error unless `condition` holds.
pub fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), SimError> {
    if condition {
        Ok(())
    } else {
        Err(SimError::Assertion(message()))
    }
}
