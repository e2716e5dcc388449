//! HTTP retrieval transport.

use std::time::Duration;

use backplane_core::transport::{ChannelRequest, RetrievalRequest, RetrievalTransport};
use backplane_types::error::TransportError;
use backplane_types::message::ChannelMessage;
use tracing::debug;

use super::jsonp::{decode_batch, decode_channel_name};

/// Per-request timeout. Retries are driven by the session's watchdog, so
/// this only bounds how long an abandoned request holds a connection.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("backplane-client/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed implementation of `RetrievalTransport`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .text()
            .await
            .map_err(|e| TransportError::Decode(format!("failed to read response: {e}")))
    }
}

impl RetrievalTransport for HttpTransport {
    async fn fetch_messages(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<ChannelMessage>, TransportError> {
        let body = self
            .get_text(&request.channel_id, &request.query_pairs())
            .await?;
        let batch = decode_batch(&body)?;
        debug!(count = batch.len(), "retrieved batch");
        Ok(batch)
    }

    async fn fetch_channel_name(&self, request: &ChannelRequest) -> Result<String, TransportError> {
        let body = self
            .get_text(&request.endpoint, &request.query_pairs())
            .await?;
        decode_channel_name(&body)
    }
}
