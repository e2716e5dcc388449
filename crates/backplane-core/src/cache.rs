//! Bounded, insertion-ordered message cache.
//!
//! The cache keeps the last `max` messages so a subscriber that joins late
//! can be replayed what it missed. It is also persisted so a restarted
//! client can pick up its cursor without asking the server for a backlog.
//!
//! Persisted layout is three keys (see `backplane_types::persisted`): the
//! id -> message map, the insertion order, and an expiry string. All three
//! are written together and removed together.

use std::collections::{HashMap, VecDeque};

use backplane_types::error::RepositoryError;
use backplane_types::message::ChannelMessage;
use backplane_types::persisted::{
    decode_expiry, decode_record, encode_expiry, encode_record, PersistedCacheIndex,
    PersistedCacheMessages, CACHE_EXPIRES_KEY, CACHE_INDEX_KEY, CACHE_MESSAGES_KEY,
    LEGACY_CACHE_KEYS,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::storage::StateStore;

/// Days a persisted cache stays valid after it was last written.
pub const CACHE_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Default)]
pub struct MessageCache {
    max: usize,
    messages: HashMap<String, ChannelMessage>,
    order: VecDeque<String>,
}

impl MessageCache {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            messages: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }

    /// Insert a message, evicting the oldest entry once over capacity.
    ///
    /// Re-recording an id already present is a no-op.
    pub fn record(&mut self, message: ChannelMessage) {
        if self.messages.contains_key(&message.id) {
            return;
        }
        self.order.push_back(message.id.clone());
        self.messages.insert(message.id.clone(), message);

        while self.order.len() > self.max {
            if let Some(oldest) = self.order.pop_front() {
                self.messages.remove(&oldest);
            }
        }
    }

    /// Cached messages, oldest first.
    pub fn replay(&self) -> Vec<ChannelMessage> {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id).cloned())
            .collect()
    }

    /// Empty the cache in memory and remove the persisted copy.
    pub async fn clear<S: StateStore>(&mut self, store: &S) -> Result<(), RepositoryError> {
        self.messages.clear();
        self.order.clear();
        for key in [CACHE_EXPIRES_KEY, CACHE_MESSAGES_KEY, CACHE_INDEX_KEY] {
            store.delete(key).await?;
        }
        Ok(())
    }

    /// Write the cache out with a fresh expiry of `now + CACHE_TTL_DAYS`.
    pub async fn persist<S: StateStore>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let messages = PersistedCacheMessages::new(self.messages.clone());
        let index = PersistedCacheIndex::new(self.order.iter().cloned().collect());
        let expires = now
            .checked_add_signed(TimeDelta::days(CACHE_TTL_DAYS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let messages =
            encode_record(&messages).map_err(|e| RepositoryError::Query(e.to_string()))?;
        let index = encode_record(&index).map_err(|e| RepositoryError::Query(e.to_string()))?;

        store.set(CACHE_MESSAGES_KEY, &messages).await?;
        store.set(CACHE_INDEX_KEY, &index).await?;
        store.set(CACHE_EXPIRES_KEY, &encode_expiry(expires)).await?;
        debug!(count = self.order.len(), "message cache persisted");
        Ok(())
    }

    /// Restore the persisted cache if it exists and has not expired.
    ///
    /// Returns the restored messages oldest first, or `None` on a miss. An
    /// expired cache is cleared. Anything that fails to decode counts as a
    /// miss and leaves the in-memory cache untouched.
    pub async fn load_if_valid<S: StateStore>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<ChannelMessage>>, RepositoryError> {
        let Some(raw_expiry) = store.get(CACHE_EXPIRES_KEY).await? else {
            return Ok(None);
        };

        let expires = match decode_expiry(&raw_expiry) {
            Ok(expires) => expires,
            Err(e) => {
                warn!(error = %e, "ignoring persisted message cache");
                return Ok(None);
            }
        };

        if now > expires {
            debug!(%expires, "persisted message cache expired");
            self.clear(store).await?;
            return Ok(None);
        }

        let (Some(raw_messages), Some(raw_index)) = (
            store.get(CACHE_MESSAGES_KEY).await?,
            store.get(CACHE_INDEX_KEY).await?,
        ) else {
            return Ok(None);
        };

        let decoded = decode_record::<PersistedCacheMessages>(raw_messages).and_then(|messages| {
            decode_record::<PersistedCacheIndex>(raw_index).map(|index| (messages, index))
        });
        let (messages, index) = match decoded {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "ignoring persisted message cache");
                return Ok(None);
            }
        };

        let mut messages = messages.messages;
        let mut order: VecDeque<String> = index
            .order
            .into_iter()
            .filter(|id| messages.contains_key(id))
            .collect();
        while order.len() > self.max {
            if let Some(oldest) = order.pop_front() {
                messages.remove(&oldest);
            }
        }
        messages.retain(|id, _| order.contains(id));

        if order.is_empty() {
            return Ok(None);
        }

        self.messages = messages;
        self.order = order;
        Ok(Some(self.replay()))
    }
}

/// Move cache keys written under their old names to the current names.
///
/// Runs only when all three legacy keys are present. Old clients stored bare
/// maps and arrays, which are wrapped into versioned records here; values
/// that don't parse are dropped. The legacy keys are deleted either way.
pub async fn migrate_legacy_keys<S: StateStore>(store: &S) -> Result<bool, RepositoryError> {
    let mut legacy = Vec::with_capacity(LEGACY_CACHE_KEYS.len());
    for (old, _) in LEGACY_CACHE_KEYS {
        match store.get(old).await? {
            Some(value) => legacy.push(value),
            None => return Ok(false),
        }
    }

    for ((_, new), value) in LEGACY_CACHE_KEYS.iter().zip(legacy) {
        if let Some(upgraded) = upgrade_legacy_value(new, value) {
            store.set(new, &upgraded).await?;
        }
    }
    for (old, _) in LEGACY_CACHE_KEYS {
        store.delete(old).await?;
    }
    debug!("legacy cache keys migrated");
    Ok(true)
}

fn upgrade_legacy_value(key: &str, value: serde_json::Value) -> Option<serde_json::Value> {
    // Old clients double-encoded values as JSON strings.
    let value = match value {
        serde_json::Value::String(s) if key != CACHE_EXPIRES_KEY => {
            serde_json::from_str(&s).ok()?
        }
        other => other,
    };

    match key {
        CACHE_MESSAGES_KEY => {
            let messages: HashMap<String, ChannelMessage> = serde_json::from_value(value).ok()?;
            encode_record(&PersistedCacheMessages::new(messages)).ok()
        }
        CACHE_INDEX_KEY => {
            let order: Vec<String> = serde_json::from_value(value).ok()?;
            encode_record(&PersistedCacheIndex::new(order)).ok()
        }
        _ => decode_expiry(&value).ok().map(encode_expiry),
    }
}
