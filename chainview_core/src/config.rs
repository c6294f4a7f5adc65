//! Client configuration.

use crate::accumulator::StalePolicy;
use crate::connection::ReconnectPolicy;
use crate::error::SyncError;
use std::time::Duration;
use url::Url;

/// Streaming endpoint used when nothing is configured.
pub const DEFAULT_WEBSOCKET_URL: &str = "ws://127.0.0.1:8001/ws/simulation";

/// Environment variable overriding the streaming endpoint.
pub const WEBSOCKET_URL_ENV: &str = "CHAINVIEW_WEBSOCKET_URL";

/// Variable name used by the web front end; honoured as a fallback.
pub const LEGACY_WEBSOCKET_URL_ENV: &str = "NEXT_PUBLIC_WEBSOCKET_URL";

/// Configuration for a synchronization session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Streaming endpoint (`ws://` or `wss://`)
    pub websocket_url: Url,

    /// Reconnect backoff and circuit breaker
    pub reconnect: ReconnectPolicy,

    /// Treatment of frames from a superseded run
    pub stale_policy: StalePolicy,

    /// Timeout for companion requests
    pub request_timeout: Duration,

    /// Timeout for the streaming handshake
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoint with default policies.
    pub fn new(websocket_url: &str) -> Result<Self, SyncError> {
        let websocket_url = parse_stream_url(websocket_url)?;

        Ok(Self {
            websocket_url,
            reconnect: ReconnectPolicy::default(),
            stale_policy: StalePolicy::default(),
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        })
    }

    /// Reads the endpoint from the process environment.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the endpoint through `lookup`, falling back to the default URL.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = [WEBSOCKET_URL_ENV, LEGACY_WEBSOCKET_URL_ENV]
            .into_iter()
            .filter_map(|key| lookup(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_WEBSOCKET_URL.to_string());

        Self::new(&url)
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the stale-frame policy.
    pub fn with_stale_policy(mut self, stale_policy: StalePolicy) -> Self {
        self.stale_policy = stale_policy;
        self
    }
}

fn parse_stream_url(raw: &str) -> Result<Url, SyncError> {
    let url = Url::parse(raw).map_err(|e| SyncError::config(format!("invalid url {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SyncError::config(format!(
            "unsupported scheme {:?} in {raw:?} (expected ws or wss)",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SyncError::config(format!("missing host in {raw:?}")));
    }
    Ok(url)
}
