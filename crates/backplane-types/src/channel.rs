//! Channel identity types and endpoint derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheme prepended to base URLs that don't carry one.
pub const DEFAULT_SCHEME: &str = "https://";

/// A bus's private polling endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub bus_name: String,
    pub channel_name: String,
    /// Full retrieval URL, always derived from the other fields.
    pub channel_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(
        server_base_url: &str,
        bus_name: &str,
        channel_name: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            bus_name: bus_name.to_string(),
            channel_name: channel_name.to_string(),
            channel_id: channel_endpoint(server_base_url, bus_name, channel_name),
            expires_at,
        }
    }
}

/// `<base>/bus/<bus>/channel/<channel>`
pub fn channel_endpoint(server_base_url: &str, bus_name: &str, channel_name: &str) -> String {
    format!("{server_base_url}/bus/{bus_name}/channel/{channel_name}")
}

/// `<base>/bus/<bus>/channel/new`, the server-side channel assignment endpoint.
pub fn new_channel_endpoint(server_base_url: &str, bus_name: &str) -> String {
    format!("{server_base_url}/bus/{bus_name}/channel/new")
}

/// Trim whitespace and trailing slashes, and add `https://` when no
/// `http://` or `https://` scheme is present.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw
        .trim_start()
        .trim_end_matches(|c: char| c.is_whitespace() || c == '/');

    let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
        ("https://", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        ("http://", rest)
    } else {
        (DEFAULT_SCHEME, trimmed)
    };

    format!("{scheme}{rest}")
}
