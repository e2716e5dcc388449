//! Client configuration types.
//!
//! `BackplaneConfig` is what `init` consumes. It can be built in code or
//! deserialized from the `config.toml` in the data directory; every field
//! except the two required ones has a default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::normalize_base_url;
use crate::error::BackplaneError;

/// Default number of messages kept for late subscribers.
pub const DEFAULT_CACHE_MAX: usize = 5;

/// Default time after which a stalled retrieval is re-issued.
pub const DEFAULT_WATCHDOG_SECS: u64 = 5;

/// Default lifetime of a persisted channel identity.
pub const DEFAULT_CHANNEL_LIFETIME_YEARS: u32 = 5;

/// Configuration for a single bus session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackplaneConfig {
    /// Base URL of the Backplane server. Required.
    #[serde(default)]
    pub server_base_url: String,

    /// Customer bus name. Required.
    #[serde(default)]
    pub bus_name: String,

    /// When true the server assigns channel names; otherwise they are
    /// synthesized locally.
    #[serde(default = "default_server_channel")]
    pub server_channel: bool,

    /// Expiry for the persisted channel identity. Defaults to five years
    /// from `init` when absent.
    #[serde(default)]
    pub channel_expires: Option<DateTime<Utc>>,

    /// How many messages to cache for late subscribers. `0` disables caching.
    #[serde(default = "default_cache_max")]
    pub cache_max: usize,

    /// Polling interval tuning.
    #[serde(default)]
    pub intervals: PollIntervals,

    /// Seconds before a retrieval with no response is re-issued.
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
}

fn default_server_channel() -> bool {
    true
}

fn default_cache_max() -> usize {
    DEFAULT_CACHE_MAX
}

fn default_watchdog_secs() -> u64 {
    DEFAULT_WATCHDOG_SECS
}

impl BackplaneConfig {
    /// Create a config with the required fields and defaults for the rest.
    pub fn new(server_base_url: impl Into<String>, bus_name: impl Into<String>) -> Self {
        Self {
            server_base_url: server_base_url.into(),
            bus_name: bus_name.into(),
            ..Self::default()
        }
    }

    /// Check required fields and return a copy with the base URL normalized.
    pub fn validated(&self) -> Result<Self, BackplaneError> {
        if self.server_base_url.trim().is_empty() {
            return Err(BackplaneError::MissingConfig("server_base_url"));
        }
        if self.bus_name.trim().is_empty() {
            return Err(BackplaneError::MissingConfig("bus_name"));
        }
        let mut config = self.clone();
        config.server_base_url = normalize_base_url(&self.server_base_url);
        Ok(config)
    }

    /// Channel expiry to persist, resolving the default against `now`.
    pub fn channel_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.channel_expires.unwrap_or_else(|| {
            now.checked_add_months(chrono::Months::new(
                12 * DEFAULT_CHANNEL_LIFETIME_YEARS,
            ))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            server_base_url: String::new(),
            bus_name: String::new(),
            server_channel: default_server_channel(),
            channel_expires: None,
            cache_max: default_cache_max(),
            intervals: PollIntervals::default(),
            watchdog_secs: default_watchdog_secs(),
        }
    }
}

/// Poll delay tuning, all in seconds.
///
/// Inside an expectation window the delay ramps from `min` to `frequent`;
/// after the window it ramps from `frequent` to `regular` over `slowdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollIntervals {
    #[serde(default = "default_min")]
    pub min: u64,
    #[serde(default = "default_frequent")]
    pub frequent: u64,
    #[serde(default = "default_regular")]
    pub regular: u64,
    #[serde(default = "default_slowdown")]
    pub slowdown: u64,
}

fn default_min() -> u64 {
    1
}

fn default_frequent() -> u64 {
    5
}

fn default_regular() -> u64 {
    60
}

fn default_slowdown() -> u64 {
    120
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            min: default_min(),
            frequent: default_frequent(),
            regular: default_regular(),
            slowdown: default_slowdown(),
        }
    }
}
