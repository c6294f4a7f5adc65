//! Production companion request channel over HTTP (reqwest).

use crate::error::EnvError;
use crate::network::RequestChannel;
use crate::types::RequestReceipt;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::warn;

/// Sends JSON requests with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpRequestChannel {
    http_client: HttpClient,
    timeout: Duration,
}

impl HttpRequestChannel {
    /// Creates a channel whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, EnvError> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::Context(e.to_string()))?;

        Ok(Self { http_client, timeout })
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<RequestReceipt, EnvError> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnvError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    EnvError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvError::Http { status: status.as_u16() });
        }

        // The request was accepted; an unreadable body only loses the detail.
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!(url, %err, "could not read response body");
                String::new()
            }
        };
        Ok(RequestReceipt {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_slow_server_is_timeout() {
        // Accepts the connection and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let channel = HttpRequestChannel::new(Duration::from_millis(200)).unwrap();
        let err = channel
            .post_json(&format!("http://{addr}/simulation/abc/disrupt"), &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, EnvError::Timeout(200)), "unexpected error: {err}");
    }
}
