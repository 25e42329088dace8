//! Error types for the CogniVerse environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The request could not be delivered (connection refused, reset, ...)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Request body or response payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Creates a serialization error.
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::SerializationError(err.to_string())
    }
}
