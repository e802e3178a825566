//! Error types for the mock broker.

use thiserror::Error;

/// Main error type for broker operations.
///
/// The broker is deliberately permissive (unknown ids are ignored, bad
/// patterns simply never match), so errors only arise at the payload
/// serialization boundary and from subscription handlers themselves.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

impl BusError {
    /// Shorthand for signalling a failure out of a subscription handler.
    pub fn handler(msg: impl Into<String>) -> Self {
        BusError::Handler(msg.into())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BusError>;
