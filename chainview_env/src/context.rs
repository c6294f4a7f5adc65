//! Core environment context trait for the ChainView synchronization engine.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for time and task scheduling.
///
/// This trait abstracts the "real world" so that the connection manager and
/// session actor can run against a live endpoint (tokio) and inside the
/// deterministic harness (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `SimContext` - virtual clock advanced by `sleep`
#[async_trait]
pub trait SyncContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock and yields
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// The name is attached to the task's tracing span.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
