//! ChainView Core - client-side synchronization engine for a live
//! supply-chain simulation stream.
//!
//! The engine keeps one logical connection to a remote simulation, starts
//! runs, folds the streamed frames into a session state and exposes
//! read-only projections of that state:
//! 1. **Connection**: reconnecting transport loop with bounded backoff
//! 2. **Classification**: every inbound frame becomes exactly one message kind or is discarded
//! 3. **Accumulation**: an append-only session state with deterministic reducers
//!
//! Pure pieces (`classifier`, `accumulator`, `commands`, `view`) have no I/O;
//! `connection` and `session` run them against a `chainview_env` context.

pub mod accumulator;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod session;
pub mod view;

// Re-export key types for convenience
pub use accumulator::{reduce, AnomalyKind, ApplyOutcome, SessionState, StalePolicy, WeekAnomaly};
pub use classifier::{classify, Inbound, Malformed};
pub use commands::{
    clamp_weeks, derive_base_url, parse_weeks, AgentConfig, DisruptOutcome, Disruption, StartRequest,
    DEFAULT_WEEKS,
};
pub use config::ClientConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionStatus, Outbound, ReconnectPolicy};
pub use error::SyncError;
pub use model::{
    AgentMode, AgentSnapshot, AgentState, EventMessage, Role, SessionId, Severity, SummaryMessage, TickMessage,
};
pub use session::{spawn_session, SessionActor, SessionCommand, SessionHandle};
pub use view::{Kpi, OrderPoint, SessionStats, SessionView};
