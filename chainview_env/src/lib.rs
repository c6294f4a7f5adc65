//! ChainView Environment Abstraction Layer
//!
//! This crate provides the abstraction allowing the ChainView synchronization
//! engine to run against a **live** endpoint (tokio + WebSocket + HTTP) and
//! inside the **deterministic harness** (virtual clock + scripted streams).
//!
//! # Core Concept
//!
//! Everything the engine touches outside its own memory is behind a trait:
//! - Time and tasks (`now()`, `sleep()`, `spawn()`)
//! - The streaming connection (`connect()`, `send()`, `recv()`)
//! - The companion request channel (`post_json()`)
//!
//! # Example
//!
//! ```ignore
//! use chainview_env::{FrameStream, StreamConnector, SyncContext};
//!
//! async fn pump<Ctx: SyncContext, C: StreamConnector>(ctx: &Ctx, connector: &C) {
//!     let mut stream = connector.connect("ws://127.0.0.1:8001/ws/simulation").await?;
//!     while let Some(Ok(frame)) = stream.recv().await {
//!         handle_frame(frame);
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;
mod ws_impl;
mod http_impl;

pub use context::SyncContext;
pub use network::{FrameStream, RequestChannel, StreamConnector};
pub use types::{ConnectionId, Frame, RequestReceipt};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use ws_impl::{WsConnector, WsStream};
pub use http_impl::HttpRequestChannel;
