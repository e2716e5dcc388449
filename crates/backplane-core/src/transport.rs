//! Retrieval transport trait.
//!
//! The session never talks HTTP directly. Every retrieval and every channel
//! assignment goes through a `RetrievalTransport`; the reqwest-backed
//! implementation lives in backplane-infra.

use std::future::Future;
use std::sync::Arc;

use backplane_types::error::TransportError;
use backplane_types::message::ChannelMessage;
use uuid::Uuid;

/// Callback name the server wraps retrieval responses in.
pub const RESPONSE_CALLBACK: &str = "Backplane.response";

/// Callback name the server wraps channel assignments in.
pub const CHANNEL_CALLBACK: &str = "Backplane.finishInit";

/// One retrieval against a channel endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// Full channel URL.
    pub channel_id: String,
    pub callback: String,
    /// Cursor at the time the request was issued. `None` before any batch.
    pub since: Option<String>,
    /// Cache-busting value, fresh per request.
    pub nonce: String,
}

impl RetrievalRequest {
    pub fn new(channel_id: impl Into<String>, since: Option<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            callback: RESPONSE_CALLBACK.to_string(),
            since,
            nonce: new_nonce(),
        }
    }

    /// Query parameters in wire order. An empty cursor is not sent.
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![("callback", self.callback.as_str())];
        if let Some(since) = self.since.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("since", since));
        }
        pairs.push(("rnd", self.nonce.as_str()));
        pairs
    }
}

/// A request for a server-assigned channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// `<base>/bus/<bus>/channel/new`
    pub endpoint: String,
    pub callback: String,
    pub nonce: String,
}

impl ChannelRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            callback: CHANNEL_CALLBACK.to_string(),
            nonce: new_nonce(),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("callback", self.callback.as_str()),
            ("rnd", self.nonce.as_str()),
        ]
    }
}

fn new_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Trait for issuing channel retrievals.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in backplane-infra.
pub trait RetrievalTransport: Send + Sync {
    /// Fetch every message on the channel after `request.since`.
    fn fetch_messages(
        &self,
        request: &RetrievalRequest,
    ) -> impl Future<Output = Result<Vec<ChannelMessage>, TransportError>> + Send;

    /// Ask the server to assign a channel name for a bus.
    fn fetch_channel_name(
        &self,
        request: &ChannelRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;
}

impl<T: RetrievalTransport> RetrievalTransport for Arc<T> {
    fn fetch_messages(
        &self,
        request: &RetrievalRequest,
    ) -> impl Future<Output = Result<Vec<ChannelMessage>, TransportError>> + Send {
        (**self).fetch_messages(request)
    }

    fn fetch_channel_name(
        &self,
        request: &ChannelRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send {
        (**self).fetch_channel_name(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_with_cursor() {
        let request = RetrievalRequest::new("https://bp/bus/b/channel/c", Some("42".to_string()));
        let pairs = request.query_pairs();
        assert_eq!(pairs[0], ("callback", RESPONSE_CALLBACK));
        assert_eq!(pairs[1], ("since", "42"));
        assert_eq!(pairs[2].0, "rnd");
    }

    #[test]
    fn test_query_pairs_omit_missing_or_empty_cursor() {
        let none = RetrievalRequest::new("c", None);
        assert!(none.query_pairs().iter().all(|(k, _)| *k != "since"));

        let empty = RetrievalRequest::new("c", Some(String::new()));
        assert!(empty.query_pairs().iter().all(|(k, _)| *k != "since"));
    }

    #[test]
    fn test_nonce_is_fresh_per_request() {
        let a = RetrievalRequest::new("c", None);
        let b = RetrievalRequest::new("c", None);
        assert_ne!(a.nonce, b.nonce);

        let c = ChannelRequest::new("https://bp/bus/b/channel/new");
        assert_eq!(c.query_pairs()[0], ("callback", CHANNEL_CALLBACK));
    }
}
