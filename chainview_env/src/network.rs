//! Transport abstractions for the streaming endpoint and its companion
//! request channel.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{Frame, RequestReceipt};

/// Opens streaming connections to an endpoint URL.
///
/// # Implementations
///
/// - **Production**: `WsConnector` (tokio-tungstenite)
/// - **Simulation**: scripted in-memory streams with fault injection
///
/// # Frame Flow
///
/// ```text
/// Client                    Connector                   Endpoint
///   |                           |                          |
///   |-- connect(url) ---------->|-- handshake ------------>|
///   |<-- Stream ----------------|                          |
///   |-- send(frame) ----------------------------------->   |
///   |<-- recv() -> frame ----------------------------------|
/// ```
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// The stream produced by a successful handshake.
    type Stream: FrameStream;

    /// Performs the handshake.
    ///
    /// # Returns
    /// * `Ok(stream)` - The connection is open
    /// * `Err(EnvError::Connect)` - Handshake failed; the caller may retry
    async fn connect(&self, url: &str) -> Result<Self::Stream, EnvError>;
}

/// One open, bidirectional text-frame connection.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Sends one text frame.
    async fn send(&mut self, frame: Frame) -> Result<(), EnvError>;

    /// Receives the next text frame.
    ///
    /// # Returns
    /// * `Some(Ok(frame))` - A frame arrived
    /// * `Some(Err(_))` - The transport failed; the stream is unusable
    /// * `None` - The peer closed the connection
    ///
    /// # Cancellation
    /// Dropping the returned future before it resolves must not lose a frame.
    async fn recv(&mut self) -> Option<Result<Frame, EnvError>>;

    /// Closes the connection. Closing an already-closed stream is not an error.
    async fn close(&mut self) -> Result<(), EnvError>;
}

/// Request/response channel used for calls that are not part of the stream.
#[async_trait]
pub trait RequestChannel: Send + Sync + 'static {
    /// POSTs a JSON body to `url`.
    ///
    /// # Returns
    /// * `Ok(receipt)` - 2xx response
    /// * `Err(EnvError::Http)` - Non-success status
    /// * `Err(EnvError::Network)` - The request could not be delivered
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<RequestReceipt, EnvError>;
}
