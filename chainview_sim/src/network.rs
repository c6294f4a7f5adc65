//! Simulated transport with fault injection.
//!
//! `SimConnector` hands the client an in-memory stream and gives the matching
//! server end (`ServerLink`) to the scenario through `SimListener`. Dropping a
//! `ServerLink` is a connection loss as seen by the client.

use async_trait::async_trait;
use chainview_env::{EnvError, Frame, FrameStream, RequestChannel, RequestReceipt, StreamConnector};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// What happens to one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFault {
    /// Handshake succeeds
    Accept,
    /// Handshake fails with `EnvError::Connect`
    Refuse,
}

/// Client end of a simulated connection.
#[derive(Debug)]
pub struct SimStream {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl FrameStream for SimStream {
    async fn send(&mut self, frame: Frame) -> Result<(), EnvError> {
        self.outbound.send(frame).map_err(|_| EnvError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, EnvError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        self.inbound.close();
        Ok(())
    }
}

/// Server end of a simulated connection, driven by a scenario.
pub struct ServerLink {
    /// 1-based index of the accepted connection
    pub index: u64,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerLink {
    /// Pushes a frame to the client. Returns `false` once the client is gone.
    pub fn send(&self, frame: impl Into<Frame>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    /// Waits for the next frame written by the client.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Stops reading from the client while still delivering to it; the
    /// client's next send fails and its receive side stays open.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }
}

/// Scripted connector. Attempts consume the fault plan in order; once it is
/// exhausted `fallback` applies.
pub struct SimConnector {
    plan: Mutex<VecDeque<LinkFault>>,
    fallback: LinkFault,
    attempts: AtomicU64,
    accepted: AtomicU64,
    listener: mpsc::UnboundedSender<ServerLink>,
}

impl SimConnector {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    fn next_fault(&self) -> LinkFault {
        self.plan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[async_trait]
impl StreamConnector for SimConnector {
    type Stream = SimStream;

    async fn connect(&self, url: &str) -> Result<SimStream, EnvError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match self.next_fault() {
            LinkFault::Refuse => {
                debug!(attempt, url, "refusing simulated handshake");
                Err(EnvError::connect(format!("simulated refusal of {url}")))
            }
            LinkFault::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let index = self.accepted.fetch_add(1, Ordering::SeqCst) + 1;

                let link = ServerLink {
                    index,
                    to_client,
                    from_client,
                };
                self.listener
                    .send(link)
                    .map_err(|_| EnvError::connect("simulated server is gone"))?;

                debug!(attempt, index, "accepted simulated handshake");
                Ok(SimStream { inbound, outbound })
            }
        }
    }
}

/// Receives server ends of accepted connections.
pub struct SimListener {
    accepted: mpsc::UnboundedReceiver<ServerLink>,
}

impl SimListener {
    pub async fn accept(&mut self) -> Option<ServerLink> {
        self.accepted.recv().await
    }
}

/// Builds a connected connector/listener pair.
pub struct SimNetwork;

impl SimNetwork {
    /// Every attempt is accepted.
    pub fn reliable() -> (Arc<SimConnector>, SimListener) {
        Self::with_plan(Vec::new(), LinkFault::Accept)
    }

    /// Attempts follow `plan`, then `fallback`.
    pub fn with_plan(plan: Vec<LinkFault>, fallback: LinkFault) -> (Arc<SimConnector>, SimListener) {
        let (listener, accepted) = mpsc::unbounded_channel();
        let connector = SimConnector {
            plan: Mutex::new(plan.into()),
            fallback,
            attempts: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            listener,
        };
        (Arc::new(connector), SimListener { accepted })
    }
}

/// A companion request seen by `RecordingRequestChannel`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub body: serde_json::Value,
}

/// Request channel that records every call and answers with a fixed status.
pub struct RecordingRequestChannel {
    status: u16,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingRequestChannel {
    /// Answers every request with 200.
    pub fn new() -> Self {
        Self::with_status(200)
    }

    /// Answers every request with `status`; non-2xx becomes `EnvError::Http`.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for RecordingRequestChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestChannel for RecordingRequestChannel {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<RequestReceipt, EnvError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedRequest {
                url: url.to_string(),
                body: body.clone(),
            });

        if (200..300).contains(&self.status) {
            Ok(RequestReceipt {
                status: self.status,
                body: String::new(),
            })
        } else {
            Err(EnvError::Http { status: self.status })
        }
    }
}
