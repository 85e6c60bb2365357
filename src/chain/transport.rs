// HTTP transport - the only place the chain touches the network

use crate::chain::error::{Result, TransportError};
use crate::provider::RawResponse;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Network boundary used by the fallback chain.
///
/// Any HTTP status is returned as a `RawResponse`; only failures to obtain a
/// response at all are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<RawResponse>;

    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `ceiling` bounds every request even if a caller passes a longer timeout
    pub fn new(ceiling: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(ceiling)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<RawResponse> {
        let status = response.status().as_u16();
        let body = response.text().await?;

        let preview: String = body.chars().take(200).collect();
        debug!(status = status, body_bytes = body.len(), response_preview = %preview, "received HTTP response");

        Ok(RawResponse::new(status, body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<RawResponse> {
        debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "sending HTTP POST");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        Self::read(response).await
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse> {
        debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "sending HTTP GET");

        let response = self.client.get(url).timeout(timeout).send().await?;

        Self::read(response).await
    }
}
