//! Common types for the ChainView environment abstraction.

use serde::{Deserialize, Serialize};

/// Monotonic identifier for one physical connection attempt.
///
/// Every successful handshake gets a fresh id, so frames can be attributed
/// to the connection that delivered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The id that precedes any real connection.
    pub const NONE: ConnectionId = ConnectionId(0);

    /// Returns the next id in sequence.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A single text frame received from or sent to the streaming endpoint.
pub type Frame = String;

/// Acknowledgement of a companion request that completed successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReceipt {
    /// HTTP status code (always 2xx)
    pub status: u16,

    /// Raw response body, if any
    pub body: String,
}
