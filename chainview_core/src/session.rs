//! Session actor - the single owner of `SessionState`.
//!
//! This module wires the pure pieces (classifier, accumulator, commands)
//! to the environment (`SyncContext`, `StreamConnector`, `RequestChannel`).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  ConnectionEvent   ┌──────────────────────────┐
//! │ ConnectionManager│ ─────────────────► │       SessionActor       │
//! │  (owns stream)   │ ◄───────────────── │  classify → apply state  │
//! └──────────────────┘     Outbound       │  publish SessionView     │
//!                                         └──────────────────────────┘
//!                                            ▲            │
//!                              SessionCommand│            │ POST /disrupt
//!                                            │            ▼ (spawned task)
//!                                     SessionHandle   RequestChannel
//! ```
//!
//! Every input is handled to completion before the next one is taken, so
//! state transitions follow frame arrival order within a connection.
//!
//! # Usage
//!
//! ```ignore
//! use chainview_core::{spawn_session, ClientConfig};
//! use chainview_env::{HttpRequestChannel, TokioContext, WsConnector};
//!
//! let config = ClientConfig::from_env()?;
//! let handle = spawn_session(
//!     TokioContext::shared(),
//!     Arc::new(WsConnector::new(config.handshake_timeout)),
//!     Arc::new(HttpRequestChannel::new(config.request_timeout)?),
//!     &config,
//! );
//! handle.start(AgentConfig::default(), 50).await?;
//! ```

use crate::accumulator::{ApplyOutcome, SessionState};
use crate::classifier::{classify, Inbound};
use crate::commands::{derive_base_url, disrupt_url, AgentConfig, DisruptOutcome, Disruption, StartRequest};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionStatus, Outbound};
use crate::error::SyncError;
use crate::view::{SessionStats, SessionView};
use chainview_env::{ConnectionId, RequestChannel, StreamConnector, SyncContext};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 64;

/// Requests accepted by the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    Start {
        request: StartRequest,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Disrupt {
        disruption: Disruption,
        reply: oneshot::Sender<DisruptOutcome>,
    },
    Snapshot(oneshot::Sender<SessionView>),
    Subscribe(mpsc::Sender<SessionView>),
    Shutdown,
}

/// Owns the session state and applies inputs one at a time.
pub struct SessionActor<Ctx, R>
where
    Ctx: SyncContext,
    R: RequestChannel,
{
    context: Arc<Ctx>,
    requests: Arc<R>,
    base_url: String,
    state: SessionState,
    status: ConnectionStatus,
    stats: SessionStats,
    has_opened: bool,
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::Receiver<ConnectionEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    subscribers: Vec<mpsc::Sender<SessionView>>,
}

impl<Ctx, R> SessionActor<Ctx, R>
where
    Ctx: SyncContext,
    R: RequestChannel,
{
    pub fn new(
        context: Arc<Ctx>,
        requests: Arc<R>,
        config: &ClientConfig,
        outbound: mpsc::Sender<Outbound>,
        events: mpsc::Receiver<ConnectionEvent>,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        Self {
            context,
            requests,
            base_url: derive_base_url(&config.websocket_url),
            state: SessionState::with_policy(config.stale_policy),
            status: ConnectionStatus::Uninstantiated,
            stats: SessionStats::default(),
            has_opened: false,
            outbound,
            events,
            commands,
            subscribers: Vec::new(),
        }
    }

    /// Runs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        let mut events_open = true;

        loop {
            let changed = tokio::select! {
                biased;
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        events_open = false;
                        false
                    }
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            };

            if changed {
                self.publish();
            }
        }

        let _ = self.outbound.try_send(Outbound::Shutdown);
        info!("session actor stopped");
    }

    /// Current snapshot.
    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state.clone(),
            status: self.status,
            stats: self.stats,
        }
    }

    fn handle_event(&mut self, event: ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Status { status, connection } => {
                if status == ConnectionStatus::Open {
                    if self.has_opened {
                        self.stats.reconnects += 1;
                    }
                    self.has_opened = true;
                }
                if status == ConnectionStatus::Closed {
                    if let Some(session_id) = self.state.session_id() {
                        info!(session = %session_id, ?connection, "connection closed, forgetting session");
                    }
                    self.state.connection_lost();
                }
                self.status = status;
                true
            }
            ConnectionEvent::Frame { connection, frame } => self.handle_frame(connection, &frame),
            ConnectionEvent::GaveUp { failures } => {
                warn!(failures, "connection abandoned");
                self.stats.gave_up = true;
                self.status = ConnectionStatus::Closed;
                true
            }
        }
    }

    fn handle_frame(&mut self, connection: ConnectionId, frame: &str) -> bool {
        let message = match classify(frame) {
            Ok(message) => message,
            Err(reason) => {
                self.stats.malformed_discarded += 1;
                debug!(%connection, %reason, "discarding malformed frame");
                return true;
            }
        };

        let kind = message.kind();
        match &message {
            Inbound::SessionIdentifier(id) => info!(session = %id, %connection, "run acknowledged"),
            Inbound::Summary(summary) => info!(title = %summary.title, "run finished"),
            Inbound::Tick(tick) => debug!(week = tick.week, %connection, "tick received"),
        }

        match self.state.apply(message) {
            ApplyOutcome::Applied { anomaly } => {
                self.stats.frames_applied += 1;
                if let Some(anomaly) = anomaly {
                    warn!(
                        previous = anomaly.previous_week,
                        received = anomaly.received_week,
                        kind = ?anomaly.kind,
                        "week sequence anomaly"
                    );
                }
            }
            ApplyOutcome::Stale => {
                self.stats.stale_rejected += 1;
                debug!(kind, %connection, "rejecting frame from superseded run");
            }
        }
        true
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Start { request, reply } => {
                let result = self.start_run(&request);
                let changed = result.is_ok();
                let _ = reply.send(result);
                changed
            }
            SessionCommand::Disrupt { disruption, reply } => {
                self.dispatch_disruption(disruption, reply);
                false
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.view());
                false
            }
            SessionCommand::Subscribe(subscriber) => {
                if subscriber.try_send(self.view()).is_ok() {
                    self.subscribers.push(subscriber);
                }
                false
            }
            SessionCommand::Shutdown => false,
        }
    }

    /// Resets the session and queues the start frame, or leaves everything
    /// untouched when the frame cannot be queued.
    fn start_run(&mut self, request: &StartRequest) -> Result<(), SyncError> {
        if self.stats.gave_up {
            warn!("connection abandoned, start request refused");
            return Err(SyncError::ConnectionUnavailable("reconnect limit reached"));
        }

        let frame = request.to_frame()?;
        let permit = match self.outbound.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                warn!("outbound queue full, start request refused");
                return Err(SyncError::ConnectionUnavailable("outbound queue full"));
            }
            Err(TrySendError::Closed(())) => {
                warn!("connection manager stopped, start request refused");
                return Err(SyncError::ConnectionUnavailable("connection manager stopped"));
            }
        };

        self.state.begin_run();
        info!(weeks = request.weeks, "starting run");
        permit.send(Outbound::Frame(frame));
        Ok(())
    }

    fn dispatch_disruption(&self, disruption: Disruption, reply: oneshot::Sender<DisruptOutcome>) {
        let Some(session_id) = self.state.session_id().cloned() else {
            debug!("no session id, disruption skipped");
            let _ = reply.send(DisruptOutcome::Skipped);
            return;
        };

        let body = match disruption.to_body() {
            Ok(body) => body,
            Err(err) => {
                let _ = reply.send(DisruptOutcome::Failed {
                    session_id,
                    reason: err.to_string(),
                });
                return;
            }
        };

        let url = disrupt_url(&self.base_url, &session_id);
        let requests = Arc::clone(&self.requests);
        self.context.spawn("disrupt", async move {
            let outcome = match requests.post_json(&url, &body).await {
                Ok(receipt) => {
                    info!(session = %session_id, status = receipt.status, "disruption delivered");
                    DisruptOutcome::Delivered {
                        session_id,
                        status: receipt.status,
                    }
                }
                Err(err) => {
                    warn!(session = %session_id, %err, "disruption request failed");
                    DisruptOutcome::Failed {
                        session_id,
                        reason: err.to_string(),
                    }
                }
            };
            let _ = reply.send(outcome);
        });
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let view = self.view();
        self.subscribers.retain(|subscriber| match subscriber.try_send(view.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("subscriber lagging, update skipped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// Cloneable façade over a running session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { commands }
    }

    /// Clears the session and asks the remote to start a run.
    ///
    /// The week count is clamped; acknowledgement arrives asynchronously as
    /// a session identifier frame. Fails with
    /// `SyncError::ConnectionUnavailable`, leaving the session untouched,
    /// when the request cannot be queued.
    pub async fn start(&self, config: AgentConfig, weeks: i64) -> Result<(), SyncError> {
        self.start_request(StartRequest::new(config, weeks)).await
    }

    pub async fn start_request(&self, request: StartRequest) -> Result<(), SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.send(SessionCommand::Start { request, reply }).await?;
        outcome.await.map_err(|_| SyncError::ActorGone)?
    }

    /// Injects a disruption into the current session.
    ///
    /// Resolves to `DisruptOutcome::Skipped` when no session id is known.
    /// Request failures are reported in the outcome, never as `Err`.
    pub async fn disrupt(&self, disruption: Disruption) -> Result<DisruptOutcome, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.send(SessionCommand::Disrupt { disruption, reply }).await?;
        outcome.await.map_err(|_| SyncError::ActorGone)
    }

    pub async fn snapshot(&self) -> Result<SessionView, SyncError> {
        let (reply, view) = oneshot::channel();
        self.send(SessionCommand::Snapshot(reply)).await?;
        view.await.map_err(|_| SyncError::ActorGone)
    }

    /// Receives a snapshot now and after every change.
    ///
    /// A subscriber that falls `buffer` snapshots behind misses intermediate
    /// updates; each snapshot is complete, so only the latest matters.
    pub async fn subscribe(&self, buffer: usize) -> Result<mpsc::Receiver<SessionView>, SyncError> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.send(SessionCommand::Subscribe(tx)).await?;
        Ok(rx)
    }

    /// Waits for the first snapshot satisfying `predicate`.
    pub async fn wait_until<F>(&self, predicate: F) -> Result<SessionView, SyncError>
    where
        F: Fn(&SessionView) -> bool,
    {
        let mut updates = self.subscribe(1024).await?;
        while let Some(view) = updates.recv().await {
            if predicate(&view) {
                return Ok(view);
            }
        }
        Err(SyncError::ActorGone)
    }

    /// Stops the actor and closes the connection.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.send(SessionCommand::Shutdown).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SyncError> {
        self.commands.send(command).await.map_err(|_| SyncError::ActorGone)
    }
}

/// Spawns the connection manager and session actor on `context`.
pub fn spawn_session<Ctx, C, R>(
    context: Arc<Ctx>,
    connector: Arc<C>,
    requests: Arc<R>,
    config: &ClientConfig,
) -> SessionHandle
where
    Ctx: SyncContext,
    C: StreamConnector,
    R: RequestChannel,
{
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

    let manager = ConnectionManager::new(
        Arc::clone(&context),
        connector,
        config.websocket_url.as_str(),
        config.reconnect.clone(),
        event_tx,
        outbound_rx,
    );
    let actor = SessionActor::new(
        Arc::clone(&context),
        requests,
        config,
        outbound_tx,
        event_rx,
        command_rx,
    );

    context.spawn("connection", manager.run());
    context.spawn("session", actor.run());

    SessionHandle::new(command_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::StalePolicy;
    use crate::config::DEFAULT_WEBSOCKET_URL;
    use crate::connection::ReconnectPolicy;
    use chainview_env::{EnvError, Frame, FrameStream, RequestReceipt, TokioContext};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ChannelStream {
        inbound: mpsc::UnboundedReceiver<Frame>,
        sent: mpsc::UnboundedSender<Frame>,
    }

    #[async_trait]
    impl FrameStream for ChannelStream {
        async fn send(&mut self, frame: Frame) -> Result<(), EnvError> {
            self.sent.send(frame).map_err(|_| EnvError::Closed)
        }

        async fn recv(&mut self) -> Option<Result<Frame, EnvError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<(), EnvError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct ChannelConnector {
        streams: Mutex<VecDeque<ChannelStream>>,
    }

    #[async_trait]
    impl StreamConnector for ChannelConnector {
        type Stream = ChannelStream;

        async fn connect(&self, url: &str) -> Result<ChannelStream, EnvError> {
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| EnvError::connect(format!("refused: {url}")))
        }
    }

    #[derive(Default)]
    struct RecordingRequests {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RequestChannel for RecordingRequests {
        async fn post_json(&self, url: &str, _body: &serde_json::Value) -> Result<RequestReceipt, EnvError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(RequestReceipt { status: 200, body: String::new() })
        }
    }

    struct Remote {
        frames: mpsc::UnboundedSender<Frame>,
        sent: mpsc::UnboundedReceiver<Frame>,
    }

    fn connector_with_one_stream() -> (Arc<ChannelConnector>, Remote) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let connector = ChannelConnector::default();
        connector.streams.lock().unwrap().push_back(ChannelStream {
            inbound: frame_rx,
            sent: sent_tx,
        });
        (Arc::new(connector), Remote { frames: frame_tx, sent: sent_rx })
    }

    fn tick(week: i64) -> String {
        let agent = r#"{"inventory":12,"placed_order_amount":4,"backlog":0,"cost":6.0}"#;
        format!(
            r#"{{"week":{week},"agents":{{"Retailer":{agent},"Wholesaler":{agent},"Distributor":{agent},"Factory":{agent}}}}}"#
        )
    }

    fn local_config() -> ClientConfig {
        ClientConfig::new(DEFAULT_WEBSOCKET_URL).unwrap()
    }

    async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), future)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn test_start_and_accumulate() {
        let (connector, mut remote) = connector_with_one_stream();
        let requests = Arc::new(RecordingRequests::default());
        let handle = spawn_session(TokioContext::shared(), connector, requests, &local_config());

        within(handle.wait_until(|view| view.status == ConnectionStatus::Open)).await.unwrap();
        handle.start(AgentConfig::default(), 10).await.unwrap();

        let sent = within(remote.sent.recv()).await.unwrap();
        assert!(sent.contains("\"start_simulation\""));
        assert!(sent.contains("\"weeks\":10"));

        remote.frames.send(r#"{"type":"simulation_id","id":"run-1"}"#.into()).unwrap();
        remote.frames.send(tick(1)).unwrap();
        remote.frames.send("not json".into()).unwrap();
        remote.frames.send(tick(2)).unwrap();

        let view = within(handle.wait_until(|view| view.state.tick_history().len() == 2))
            .await
            .unwrap();
        assert_eq!(view.state.session_id().map(|id| id.as_str()), Some("run-1"));
        assert_eq!(view.stats.malformed_discarded, 1);
        assert_eq!(view.stats.frames_applied, 3);
        assert!(view.is_running());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disrupt_requires_session() {
        let (connector, remote) = connector_with_one_stream();
        let requests = Arc::new(RecordingRequests::default());
        let handle = spawn_session(
            TokioContext::shared(),
            connector,
            Arc::clone(&requests),
            &local_config(),
        );

        let outcome = within(handle.disrupt(Disruption::default_demand_spike())).await.unwrap();
        assert_eq!(outcome, DisruptOutcome::Skipped);
        assert!(requests.urls.lock().unwrap().is_empty());

        remote.frames.send(r#"{"type":"simulation_id","id":"abc"}"#.into()).unwrap();
        within(handle.wait_until(|view| view.state.session_id().is_some())).await.unwrap();

        let outcome = within(handle.disrupt(Disruption::default_demand_spike())).await.unwrap();
        assert_eq!(
            outcome,
            DisruptOutcome::Delivered {
                session_id: crate::model::SessionId::new("abc"),
                status: 200
            }
        );
        assert_eq!(
            requests.urls.lock().unwrap().as_slice(),
            ["http://127.0.0.1:8001/simulation/abc/disrupt"]
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_limit() {
        let connector = Arc::new(ChannelConnector::default());
        let config = local_config()
            .with_stale_policy(StalePolicy::Strict)
            .with_reconnect(ReconnectPolicy {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2,
                max_attempts: Some(3),
            });
        let handle = spawn_session(
            TokioContext::shared(),
            connector,
            Arc::new(RecordingRequests::default()),
            &config,
        );

        let view = within(handle.wait_until(|view| view.stats.gave_up)).await.unwrap();
        assert_eq!(view.status, ConnectionStatus::Closed);
        assert_eq!(view.connection_status_text(), "Disconnected");

        // Nothing can carry the start frame any more: refuse it and keep state.
        let err = within(handle.start(AgentConfig::default(), 10)).await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionUnavailable(_)), "{err}");
        let after = within(handle.snapshot()).await.unwrap();
        assert_eq!(after.state, view.state);
        assert!(!after.state.awaiting_ack());
    }
}
