//! Connection manager - owns the one logical connection to the stream.
//!
//! # State Machine
//!
//! ```text
//! Uninstantiated ──► Connecting ──► Open ──► Closed ──► (backoff) ──► Connecting ...
//!                        │                     ▲
//!                        └──── handshake ──────┘
//!                              failure
//! Open ──► Closing ──► Closed                       (explicit shutdown)
//! Closed ──► GaveUp                                 (circuit breaker tripped)
//! ```
//!
//! Inbound frames are forwarded one event per frame, in arrival order.
//! Outbound frames submitted while the connection is down are queued and
//! flushed after the next handshake.

use chainview_env::{ConnectionId, Frame, FrameStream, StreamConnector, SyncContext};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connectivity as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionStatus {
    /// Human-readable status line.
    pub fn text(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Open => "Live Simulation Running",
            ConnectionStatus::Closing => "Closing...",
            ConnectionStatus::Closed => "Disconnected",
            ConnectionStatus::Uninstantiated => "Uninstantiated",
        }
    }
}

/// Bounded exponential backoff with an optional circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Growth factor per consecutive failure
    pub multiplier: u32,

    /// Consecutive failures before giving up (`None` = retry forever)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Retries forever, still with backoff.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    /// Sets the consecutive-failure limit.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after `failures` consecutive failures (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }
}

/// Notifications from the connection manager to the session actor.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Status {
        status: ConnectionStatus,
        connection: Option<ConnectionId>,
    },
    Frame {
        connection: ConnectionId,
        frame: Frame,
    },
    /// The circuit breaker tripped; no further attempts will be made
    GaveUp { failures: u32 },
}

/// Requests to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Shutdown,
}

enum PumpExit {
    Lost { reason: String },
    Shutdown,
}

/// Owns the transport and runs the connect/pump/reconnect loop.
pub struct ConnectionManager<Ctx, C>
where
    Ctx: SyncContext,
    C: StreamConnector,
{
    context: Arc<Ctx>,
    connector: Arc<C>,
    url: String,
    policy: ReconnectPolicy,
    events: mpsc::Sender<ConnectionEvent>,
    outbound: mpsc::Receiver<Outbound>,
    pending: VecDeque<Frame>,
    last_id: ConnectionId,
}

impl<Ctx, C> ConnectionManager<Ctx, C>
where
    Ctx: SyncContext,
    C: StreamConnector,
{
    pub fn new(
        context: Arc<Ctx>,
        connector: Arc<C>,
        url: impl Into<String>,
        policy: ReconnectPolicy,
        events: mpsc::Sender<ConnectionEvent>,
        outbound: mpsc::Receiver<Outbound>,
    ) -> Self {
        Self {
            context,
            connector,
            url: url.into(),
            policy,
            events,
            outbound,
            pending: VecDeque::new(),
            last_id: ConnectionId::NONE,
        }
    }

    /// Runs until shutdown, until the event receiver is dropped, or until
    /// the circuit breaker trips.
    ///
    /// Only failed handshakes count toward the breaker; every successful
    /// handshake resets the count.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            self.emit_status(ConnectionStatus::Connecting, None).await;

            let attempt = self.connector.connect(&self.url).await;
            match attempt {
                Ok(mut stream) => {
                    failures = 0;
                    self.last_id = self.last_id.next();
                    let id = self.last_id;
                    info!(url = %self.url, connection = %id, "connection open");
                    self.emit_status(ConnectionStatus::Open, Some(id)).await;

                    match self.pump(&mut stream, id).await {
                        PumpExit::Shutdown => {
                            self.emit_status(ConnectionStatus::Closing, Some(id)).await;
                            if let Err(err) = stream.close().await {
                                debug!(%err, "close during shutdown failed");
                            }
                            self.emit_status(ConnectionStatus::Closed, Some(id)).await;
                            info!(connection = %id, "connection shut down");
                            return;
                        }
                        PumpExit::Lost { reason } => {
                            if let Err(err) = stream.close().await {
                                debug!(%err, "close after connection loss failed");
                            }
                            warn!(connection = %id, %reason, "connection lost");
                            self.emit_status(ConnectionStatus::Closed, Some(id)).await;
                        }
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    warn!(url = %self.url, %err, attempt = failures, "connect failed");
                    self.emit_status(ConnectionStatus::Closed, None).await;

                    if !self.policy.allows_retry(failures) {
                        warn!(failures, "reconnect limit reached, giving up");
                        let _ = self.events.send(ConnectionEvent::GaveUp { failures }).await;
                        return;
                    }
                }
            }

            let delay = self.policy.delay_for(failures.max(1));
            debug!(?delay, failures, "waiting before reconnect");
            if !self.backoff(delay).await {
                info!("shutdown requested while reconnecting");
                return;
            }
        }
    }

    /// Moves frames between the stream and the channels until the stream
    /// fails or shutdown is requested.
    async fn pump(&mut self, stream: &mut C::Stream, id: ConnectionId) -> PumpExit {
        while let Some(frame) = self.pending.pop_front() {
            if let Err(err) = stream.send(frame.clone()).await {
                self.pending.push_front(frame);
                return PumpExit::Lost { reason: err.to_string() };
            }
        }

        loop {
            tokio::select! {
                inbound = stream.recv() => match inbound {
                    Some(Ok(frame)) => {
                        let event = ConnectionEvent::Frame { connection: id, frame };
                        if self.events.send(event).await.is_err() {
                            return PumpExit::Shutdown;
                        }
                    }
                    Some(Err(err)) => return PumpExit::Lost { reason: err.to_string() },
                    None => return PumpExit::Lost { reason: "closed by peer".to_string() },
                },
                request = self.outbound.recv() => match request {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(err) = stream.send(frame.clone()).await {
                            self.pending.push_front(frame);
                            return PumpExit::Lost { reason: err.to_string() };
                        }
                    }
                    Some(Outbound::Shutdown) | None => return PumpExit::Shutdown,
                },
            }
        }
    }

    /// Waits out a reconnect delay while still queueing outbound frames.
    /// Returns `false` when shutdown was requested.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let context = Arc::clone(&self.context);
        let mut sleep = context.sleep(delay);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                request = self.outbound.recv() => match request {
                    Some(Outbound::Frame(frame)) => self.pending.push_back(frame),
                    Some(Outbound::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn emit_status(&self, status: ConnectionStatus, connection: Option<ConnectionId>) {
        debug!(?status, ?connection, "connection status");
        let _ = self
            .events
            .send(ConnectionEvent::Status { status, connection })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(6), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_circuit_breaker_limit() {
        let policy = ReconnectPolicy::default().with_max_attempts(Some(3));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(ReconnectPolicy::unbounded().allows_retry(u32::MAX));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(ConnectionStatus::Open.text(), "Live Simulation Running");
        assert_eq!(ConnectionStatus::Closed.text(), "Disconnected");
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Uninstantiated);
    }
}
