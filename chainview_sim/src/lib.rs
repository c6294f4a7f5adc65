//! ChainView Deterministic Simulation Testing (DST) Harness
//!
//! Runs the real synchronization engine against a scripted remote so that
//! connection faults, garbage frames and restarts are reproducible from a
//! single seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advanced only by the engine's own sleeps
//! - **Network**: In-memory links with scripted refusals and drops
//! - **Randomness**: Remote demand noise and fault placement derive from the seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                       │
//! │  ┌─────────────┐   SimConnector    ┌──────────────────┐  │
//! │  │ SessionActor│◄─────────────────►│ ServerLink       │  │
//! │  │ + Connection│   (in-memory)     │ driven by Oracle │  │
//! │  │   Manager   │                   └──────────────────┘  │
//! │  └─────┬───────┘                                         │
//! │        │ POST disrupt                                    │
//! │  ┌─────▼─────────────────┐   ┌────────────────────────┐  │
//! │  │RecordingRequestChannel│   │ SimContext (clock/RNG) │  │
//! │  └───────────────────────┘   └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chainview_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::ReconnectMidRun);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod network;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{SessionFrame, SimExport};
pub use network::{LinkFault, RecordedRequest, RecordingRequestChannel, ServerLink, SimConnector, SimListener, SimNetwork, SimStream};
pub use oracle::{Oracle, OFF_CYCLE_WEEK};
pub use runner::{ScenarioError, ScenarioMetrics, ScenarioResult, ScenarioRunner, SIM_WEBSOCKET_URL};
