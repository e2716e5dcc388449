//! Per-bus channel identity.
//!
//! A bus's channel name is persisted in one record that holds the mapping
//! for every bus this client has used. Every write re-reads that record,
//! applies the change for the current bus, and writes the whole mapping back,
//! so sessions for other buses keep their entries.
//!
//! Store failures here are logged and absorbed: a client that cannot persist
//! its identity still polls with the in-memory one.

use std::collections::BTreeMap;

use backplane_types::channel::{new_channel_endpoint, Channel};
use backplane_types::config::BackplaneConfig;
use backplane_types::error::RepositoryError;
use backplane_types::persisted::{decode_record, encode_record, PersistedChannels, CHANNELS_KEY};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::MessageCache;
use crate::storage::StateStore;
use crate::transport::ChannelRequest;

/// Outcome of resolving the channel for the configured bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A channel is ready. `fresh` is false when it was restored.
    Ready { channel: Channel, fresh: bool },
    /// The server has to assign a name; issue this request.
    AwaitingServer(ChannelRequest),
}

#[derive(Debug, Clone)]
pub struct ChannelIdentity {
    server_base_url: String,
    bus_name: String,
    server_channel: bool,
    expires_at: DateTime<Utc>,
    channels: BTreeMap<String, String>,
    current: Option<Channel>,
}

impl ChannelIdentity {
    /// `config` must already be validated.
    pub fn new(config: &BackplaneConfig, now: DateTime<Utc>) -> Self {
        Self {
            server_base_url: config.server_base_url.clone(),
            bus_name: config.bus_name.clone(),
            server_channel: config.server_channel,
            expires_at: config.channel_expiry(now),
            channels: BTreeMap::new(),
            current: None,
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    /// The resolved channel, if any.
    pub fn channel(&self) -> Option<&Channel> {
        self.current.as_ref()
    }

    /// Every bus -> channel name pair known from the last read or write.
    pub fn known_channels(&self) -> &BTreeMap<String, String> {
        &self.channels
    }

    /// Read the persisted mapping. Missing, corrupt, or expired records
    /// leave the mapping empty.
    pub async fn load<S: StateStore>(&mut self, store: &S, now: DateTime<Utc>) {
        match read_mapping(store, now).await {
            Ok(channels) => self.channels = channels,
            Err(e) => warn!(error = %e, "failed to read persisted channel identity"),
        }
    }

    /// Find or create the channel for the configured bus.
    ///
    /// A restored name is returned as-is. Otherwise the cache is cleared and
    /// either a name is synthesized and persisted (self-assigned mode) or a
    /// server request is returned for the caller to issue.
    pub async fn resolve<S: StateStore>(
        &mut self,
        store: &S,
        cache: &mut MessageCache,
        now: DateTime<Utc>,
    ) -> Resolution {
        if let Some(name) = self.channels.get(&self.bus_name).cloned() {
            let channel = self.assign(&name);
            debug!(channel_id = %channel.channel_id, "restored channel");
            return Resolution::Ready {
                channel,
                fresh: false,
            };
        }

        if let Err(e) = cache.clear(store).await {
            warn!(error = %e, "failed to clear message cache");
        }

        if self.server_channel {
            let endpoint = new_channel_endpoint(&self.server_base_url, &self.bus_name);
            return Resolution::AwaitingServer(ChannelRequest::new(endpoint));
        }

        let name = synthesize_channel_name(now);
        let channel = self.complete(store, &name, now).await;
        Resolution::Ready {
            channel,
            fresh: true,
        }
    }

    /// Record a newly assigned name and persist it.
    pub async fn complete<S: StateStore>(
        &mut self,
        store: &S,
        channel_name: &str,
        now: DateTime<Utc>,
    ) -> Channel {
        let channel = self.assign(channel_name);
        let bus = self.bus_name.clone();
        let name = channel_name.to_string();
        self.write_mapping(store, now, move |channels| {
            channels.insert(bus, name);
        })
        .await;
        info!(bus = %self.bus_name, channel_id = %channel.channel_id, "channel assigned");
        channel
    }

    /// Forget the channel for the configured bus and clear the cache.
    pub async fn invalidate<S: StateStore>(
        &mut self,
        store: &S,
        cache: &mut MessageCache,
        now: DateTime<Utc>,
    ) {
        self.current = None;
        let bus = self.bus_name.clone();
        self.write_mapping(store, now, move |channels| {
            channels.remove(&bus);
        })
        .await;
        if let Err(e) = cache.clear(store).await {
            warn!(error = %e, "failed to clear message cache");
        }
        info!(bus = %self.bus_name, "channel invalidated");
    }

    /// Invalidate, then resolve a replacement.
    pub async fn reset<S: StateStore>(
        &mut self,
        store: &S,
        cache: &mut MessageCache,
        now: DateTime<Utc>,
    ) -> Resolution {
        self.invalidate(store, cache, now).await;
        self.resolve(store, cache, now).await
    }

    fn assign(&mut self, channel_name: &str) -> Channel {
        let channel = Channel::new(
            &self.server_base_url,
            &self.bus_name,
            channel_name,
            self.expires_at,
        );
        self.channels
            .insert(self.bus_name.clone(), channel_name.to_string());
        self.current = Some(channel.clone());
        channel
    }

    async fn write_mapping<S: StateStore>(
        &mut self,
        store: &S,
        now: DateTime<Utc>,
        update: impl FnOnce(&mut BTreeMap<String, String>) + Send,
    ) {
        // Merge into what is on disk so other buses' entries survive.
        let mut channels = match read_mapping(store, now).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(error = %e, "failed to read persisted channel identity");
                self.channels.clone()
            }
        };
        update(&mut channels);

        let record = PersistedChannels::new(channels.clone(), self.expires_at);
        let result = match encode_record(&record) {
            Ok(value) => store.set(CHANNELS_KEY, &value).await,
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist channel identity");
        }
        self.channels = channels;
    }
}

/// `<unix millis><5 random digits>`
pub fn synthesize_channel_name(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().as_u128() % 100_000;
    format!("{}{:05}", now.timestamp_millis(), suffix)
}

async fn read_mapping<S: StateStore>(
    store: &S,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, String>, RepositoryError> {
    let Some(value) = store.get(CHANNELS_KEY).await? else {
        return Ok(BTreeMap::new());
    };
    match decode_record::<PersistedChannels>(value) {
        Ok(record) if now > record.expires_at => {
            debug!(expires_at = %record.expires_at, "persisted channel identity expired");
            Ok(BTreeMap::new())
        }
        Ok(record) => Ok(record.channels),
        Err(e) => {
            warn!(error = %e, "ignoring persisted channel identity");
            Ok(BTreeMap::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{msg, MemoryStore};
    use backplane_types::persisted::CACHE_INDEX_KEY;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn config(server_channel: bool) -> BackplaneConfig {
        BackplaneConfig {
            server_channel,
            ..BackplaneConfig::new("https://bp.example.com/v1", "example.com")
        }
        .validated()
        .unwrap()
    }

    fn persisted(channels: &[(&str, &str)], expires_at: DateTime<Utc>) -> serde_json::Value {
        let map = channels
            .iter()
            .map(|(b, c)| (b.to_string(), c.to_string()))
            .collect();
        encode_record(&PersistedChannels::new(map, expires_at)).unwrap()
    }

    fn stored_channels(store: &MemoryStore) -> BTreeMap<String, String> {
        let value = store.snapshot(CHANNELS_KEY).unwrap();
        decode_record::<PersistedChannels>(value).unwrap().channels
    }

    #[test]
    fn test_synthesized_name_shape() {
        let name = synthesize_channel_name(now());
        let millis = now().timestamp_millis().to_string();
        assert!(name.starts_with(&millis));
        assert_eq!(name.len(), millis.len() + 5);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_restores_persisted_channel() {
        let store = MemoryStore::new();
        store.put(
            CHANNELS_KEY,
            persisted(&[("example.com", "saved")], now() + TimeDelta::days(30)),
        );
        let mut identity = ChannelIdentity::new(&config(true), now());
        let mut cache = MessageCache::new(5);
        identity.load(&store, now()).await;

        match identity.resolve(&store, &mut cache, now()).await {
            Resolution::Ready { channel, fresh } => {
                assert!(!fresh);
                assert_eq!(
                    channel.channel_id,
                    "https://bp.example.com/v1/bus/example.com/channel/saved"
                );
            }
            other => panic!("expected restored channel, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_identity_is_ignored() {
        let store = MemoryStore::new();
        store.put(
            CHANNELS_KEY,
            persisted(&[("example.com", "old")], now() - TimeDelta::days(1)),
        );
        let mut identity = ChannelIdentity::new(&config(true), now());
        identity.load(&store, now()).await;
        assert!(identity.known_channels().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_identity_is_ignored() {
        let store = MemoryStore::new();
        store.put(CHANNELS_KEY, json!({"version": 1, "channels": 12}));
        let mut identity = ChannelIdentity::new(&config(true), now());
        identity.load(&store, now()).await;
        assert!(identity.known_channels().is_empty());
    }

    #[tokio::test]
    async fn test_server_mode_requests_new_channel() {
        let store = MemoryStore::new();
        let mut identity = ChannelIdentity::new(&config(true), now());
        let mut cache = MessageCache::new(5);

        match identity.resolve(&store, &mut cache, now()).await {
            Resolution::AwaitingServer(request) => assert_eq!(
                request.endpoint,
                "https://bp.example.com/v1/bus/example.com/channel/new"
            ),
            other => panic!("expected server request, got {other:?}"),
        }
        assert!(identity.channel().is_none());

        let channel = identity.complete(&store, "assigned", now()).await;
        assert_eq!(identity.channel(), Some(&channel));
        assert_eq!(stored_channels(&store)["example.com"], "assigned");
    }

    #[tokio::test]
    async fn test_self_assigned_mode_synthesizes_and_persists() {
        let store = MemoryStore::new();
        let mut identity = ChannelIdentity::new(&config(false), now());
        let mut cache = MessageCache::new(5);

        let Resolution::Ready { channel, fresh } =
            identity.resolve(&store, &mut cache, now()).await
        else {
            panic!("self-assigned mode resolves immediately");
        };
        assert!(fresh);
        assert_eq!(stored_channels(&store)["example.com"], channel.channel_name);
    }

    #[tokio::test]
    async fn test_write_keeps_other_buses() {
        let store = MemoryStore::new();
        store.put(
            CHANNELS_KEY,
            persisted(&[("other.org", "theirs")], now() + TimeDelta::days(30)),
        );
        let mut identity = ChannelIdentity::new(&config(true), now());
        identity.complete(&store, "ours", now()).await;

        let channels = stored_channels(&store);
        assert_eq!(channels["other.org"], "theirs");
        assert_eq!(channels["example.com"], "ours");
    }

    #[tokio::test]
    async fn test_reset_replaces_channel_and_clears_cache() {
        let store = MemoryStore::new();
        let mut identity = ChannelIdentity::new(&config(false), now());
        let mut cache = MessageCache::new(5);
        let Resolution::Ready { channel: first, .. } =
            identity.resolve(&store, &mut cache, now()).await
        else {
            panic!("self-assigned mode resolves immediately");
        };

        cache.record(msg("1", "x"));
        cache.persist(&store, now()).await.unwrap();

        let later = now() + TimeDelta::seconds(1);
        let Resolution::Ready { channel: second, fresh } =
            identity.reset(&store, &mut cache, later).await
        else {
            panic!("self-assigned mode resolves immediately");
        };
        assert!(fresh);
        assert_ne!(first.channel_name, second.channel_name);
        assert!(cache.is_empty());
        assert!(store.snapshot(CACHE_INDEX_KEY).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_mapping() {
        let store = MemoryStore::new();
        let mut identity = ChannelIdentity::new(&config(true), now());
        let mut cache = MessageCache::new(5);
        identity.complete(&store, "c1", now()).await;

        identity.invalidate(&store, &mut cache, now()).await;
        assert!(identity.channel().is_none());
        assert!(!stored_channels(&store).contains_key("example.com"));
    }
}
