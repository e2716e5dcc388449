//! Persisted record schemas.
//!
//! Channel identity and the message cache are written to a flat key/value
//! store as JSON. Every record carries a schema version; anything that fails
//! to decode, or carries a version this build doesn't know, is reported as a
//! [`PersistedStateError`] and treated by callers as empty state.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PersistedStateError;
use crate::message::ChannelMessage;

/// Current schema version for every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

/// Key holding the bus -> channel mapping for every known bus.
pub const CHANNELS_KEY: &str = "backplane-channel";

/// Key holding the id -> message map of the cache.
pub const CACHE_MESSAGES_KEY: &str = "backplaneCachedMessages";

/// Key holding the insertion order of cached ids.
pub const CACHE_INDEX_KEY: &str = "backplaneCachedMessagesIndex";

/// Key holding the cache expiry (UTC string).
pub const CACHE_EXPIRES_KEY: &str = "backplaneCacheExpires";

/// Cache keys written by older clients, paired with their current names.
pub const LEGACY_CACHE_KEYS: [(&str, &str); 3] = [
    ("cacheExpires", CACHE_EXPIRES_KEY),
    ("cachedMessages", CACHE_MESSAGES_KEY),
    ("cachedMessagesIndex", CACHE_INDEX_KEY),
];

/// A record that carries a schema version.
pub trait VersionedRecord: Serialize + DeserializeOwned {
    fn version(&self) -> u32;
}

/// Channel names for every bus, stored as one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChannels {
    pub version: u32,
    pub channels: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

impl PersistedChannels {
    pub fn new(channels: BTreeMap<String, String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            channels,
            expires_at,
        }
    }
}

impl VersionedRecord for PersistedChannels {
    fn version(&self) -> u32 {
        self.version
    }
}

/// The id -> message half of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCacheMessages {
    pub version: u32,
    pub messages: HashMap<String, ChannelMessage>,
}

impl PersistedCacheMessages {
    pub fn new(messages: HashMap<String, ChannelMessage>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            messages,
        }
    }
}

impl VersionedRecord for PersistedCacheMessages {
    fn version(&self) -> u32 {
        self.version
    }
}

/// The insertion-order half of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCacheIndex {
    pub version: u32,
    pub order: Vec<String>,
}

impl PersistedCacheIndex {
    pub fn new(order: Vec<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            order,
        }
    }
}

impl VersionedRecord for PersistedCacheIndex {
    fn version(&self) -> u32 {
        self.version
    }
}

/// Encode a record for storage.
pub fn encode_record<T: VersionedRecord>(record: &T) -> Result<serde_json::Value, PersistedStateError> {
    serde_json::to_value(record)
        .map_err(|e| PersistedStateError::CorruptPersistedState(e.to_string()))
}

/// Decode a stored record, rejecting unknown schema versions.
pub fn decode_record<T: VersionedRecord>(value: serde_json::Value) -> Result<T, PersistedStateError> {
    let record: T = serde_json::from_value(value)
        .map_err(|e| PersistedStateError::CorruptPersistedState(e.to_string()))?;
    if record.version() != SCHEMA_VERSION {
        return Err(PersistedStateError::UnsupportedVersion {
            found: record.version(),
            expected: SCHEMA_VERSION,
        });
    }
    Ok(record)
}

/// Cache expiry is stored as an RFC 2822 UTC string.
pub fn encode_expiry(expires_at: DateTime<Utc>) -> serde_json::Value {
    serde_json::Value::String(expires_at.to_rfc2822())
}

pub fn decode_expiry(value: &serde_json::Value) -> Result<DateTime<Utc>, PersistedStateError> {
    let raw = value.as_str().ok_or_else(|| {
        PersistedStateError::CorruptPersistedState("cache expiry is not a string".to_string())
    })?;
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistedStateError::CorruptPersistedState(format!("invalid expiry: {e}")))
}
