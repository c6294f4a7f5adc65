//! Error types for the synchronization engine.

use chainview_env::EnvError;
use thiserror::Error;

/// Errors surfaced by the engine's public API.
///
/// Transport faults inside a running session are absorbed and logged; these
/// errors only reach callers at construction time or when the session task
/// has stopped.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The connection manager can no longer take outbound frames
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(&'static str),

    /// The session task has shut down
    #[error("Session actor is no longer running")]
    ActorGone,
}

impl SyncError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
