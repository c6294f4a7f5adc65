//! Error types for the ChainView environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Handshake with the streaming endpoint failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// Frame send/receive failed on an established connection
    #[error("Network error: {0}")]
    Network(String),

    /// The connection was closed by the peer or locally
    #[error("Connection closed")]
    Closed,

    /// Payload serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Companion request answered with a non-success status
    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    /// Context operation failed
    #[error("Context error: {0}")]
    Context(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a connect error.
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Whether the failure happened before any frame could flow.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
