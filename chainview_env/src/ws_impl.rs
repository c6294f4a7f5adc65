//! Production streaming transport over WebSocket (tokio-tungstenite).

use crate::error::EnvError;
use crate::network::{FrameStream, StreamConnector};
use crate::types::Frame;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens WebSocket connections with a handshake timeout.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector with the given handshake timeout.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    type Stream = WsStream;

    async fn connect(&self, url: &str) -> Result<Self::Stream, EnvError> {
        let handshake = tokio_tungstenite::connect_async(url);
        match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(Ok((inner, response))) => {
                debug!(status = %response.status(), "websocket handshake complete");
                Ok(WsStream { inner })
            }
            Ok(Err(err)) => Err(EnvError::connect(err.to_string())),
            Err(_) => Err(EnvError::Timeout(self.handshake_timeout.as_millis() as u64)),
        }
    }
}

/// An open WebSocket connection carrying JSON text frames.
pub struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn send(&mut self, frame: Frame) -> Result<(), EnvError> {
        self.inner
            .send(Message::Text(frame))
            .await
            .map_err(|e| EnvError::network(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, EnvError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer closed websocket");
                    return None;
                }
                // Ping/Pong are answered by tungstenite itself.
                Ok(_) => {}
                Err(err) => return Some(Err(EnvError::network(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), EnvError> {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match self.inner.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(EnvError::network(err.to_string())),
        }
    }
}
