//! The client session.
//!
//! `BackplaneClient` owns every piece of client state behind one
//! `tokio::sync::Mutex`: channel identity, message cache, expectation
//! tracker, subscriber registry, poll scheduler, and response processor.
//! Cloning the client clones a handle to the same session.
//!
//! Lifecycle: `Uninitialized -> ResolvingChannel -> Running <-> Stopped`.
//! The session is `Running` while it has a channel and at least one
//! subscriber; `Stopped` when it has a channel and nobody is listening.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backplane_types::channel::Channel;
use backplane_types::config::BackplaneConfig;
use backplane_types::error::{BackplaneError, TransportError};
use backplane_types::event::ClientEvent;
use backplane_types::message::ChannelMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{migrate_legacy_keys, MessageCache};
use crate::clock::Clock;
use crate::event::EventBus;
use crate::expectation::ExpectationTracker;
use crate::identity::{ChannelIdentity, Resolution};
use crate::processor::{FrameFilter, ResponseProcessor};
use crate::scheduler::PollScheduler;
use crate::storage::StateStore;
use crate::subscriber::{SubscriberCallback, SubscriberRegistry, SubscriptionId};
use crate::transport::{ChannelRequest, RetrievalTransport};

/// Window used by `expect_messages`.
pub const DEFAULT_EXPECT_SECS: u64 = 60;

/// Upper bound on the delay between channel assignment retries.
pub const CHANNEL_RETRY_CAP_SECS: u64 = 30;

const EVENT_BUS_CAPACITY: usize = 256;

/// Listener run once with the channel id after the first resolution.
pub type InitListener = Box<dyn FnOnce(&str) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    ResolvingChannel,
    Running,
    Stopped,
}

impl SessionPhase {
    /// True once a channel is available.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::ResolvingChannel => "resolving_channel",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Mutable session state. Only touched with the session lock held.
pub(crate) struct ClientState {
    pub(crate) config: Option<BackplaneConfig>,
    pub(crate) identity: Option<ChannelIdentity>,
    /// Set by the first channel resolution; never cleared.
    pub(crate) initialized: bool,
    pub(crate) cache: MessageCache,
    pub(crate) tracker: ExpectationTracker,
    pub(crate) registry: SubscriberRegistry,
    pub(crate) scheduler: PollScheduler,
    pub(crate) processor: ResponseProcessor,
    pub(crate) init_listeners: Vec<InitListener>,
    /// Bumped whenever an in-flight channel request must be abandoned.
    pub(crate) resolve_generation: u64,
}

impl ClientState {
    fn new() -> Self {
        let config = BackplaneConfig::default();
        Self {
            config: None,
            identity: None,
            initialized: false,
            cache: MessageCache::new(config.cache_max),
            tracker: ExpectationTracker::new(config.intervals),
            registry: SubscriberRegistry::new(),
            scheduler: PollScheduler::default(),
            processor: ResponseProcessor::new(None),
            init_listeners: Vec::new(),
            resolve_generation: 0,
        }
    }

    pub(crate) fn channel(&self) -> Option<&Channel> {
        self.identity.as_ref().and_then(ChannelIdentity::channel)
    }

    fn phase(&self) -> SessionPhase {
        match (self.config.is_some(), self.channel().is_some()) {
            (false, _) => SessionPhase::Uninitialized,
            (true, false) => SessionPhase::ResolvingChannel,
            (true, true) if self.scheduler.is_running() => SessionPhase::Running,
            (true, true) => SessionPhase::Stopped,
        }
    }
}

pub(crate) struct ClientInner<T, S> {
    pub(crate) transport: T,
    pub(crate) store: S,
    pub(crate) clock: Clock,
    pub(crate) events: EventBus,
    phase: watch::Sender<SessionPhase>,
    pub(crate) state: Mutex<ClientState>,
}

/// Handle to a Backplane client session.
pub struct BackplaneClient<T, S> {
    inner: Arc<ClientInner<T, S>>,
}

impl<T, S> Clone for BackplaneClient<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> fmt::Debug for BackplaneClient<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackplaneClient")
            .field("phase", &*self.inner.phase.borrow())
            .finish()
    }
}

impl<T, S> BackplaneClient<T, S>
where
    T: RetrievalTransport + 'static,
    S: StateStore + 'static,
{
    pub fn new(transport: T, store: S) -> Self {
        Self::with_clock(transport, store, Clock::new())
    }

    pub fn with_clock(transport: T, store: S, clock: Clock) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Uninitialized);
        Self {
            inner: Arc::new(ClientInner {
                transport,
                store,
                clock,
                events: EventBus::new(EVENT_BUS_CAPACITY),
                phase,
                state: Mutex::new(ClientState::new()),
            }),
        }
    }

    /// Start the session for one bus.
    ///
    /// Fails without touching any state when the config is missing a required
    /// field or the session was already initialized. In server-assigned mode
    /// this returns before the channel exists; use `ready` or `on_init` to
    /// wait for it.
    pub async fn init(&self, config: BackplaneConfig) -> Result<(), BackplaneError> {
        self.initialize(config, None).await
    }

    /// Like `init`, but the first batch is passed through `filter` instead of
    /// being discarded.
    pub async fn init_with_frame_filter<F>(
        &self,
        config: BackplaneConfig,
        filter: F,
    ) -> Result<(), BackplaneError>
    where
        F: Fn(Vec<ChannelMessage>) -> Vec<ChannelMessage> + Send + Sync + 'static,
    {
        self.initialize(config, Some(Arc::new(filter))).await
    }

    async fn initialize(
        &self,
        config: BackplaneConfig,
        filter: Option<FrameFilter>,
    ) -> Result<(), BackplaneError> {
        let config = config.validated()?;
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        if guard.config.is_some() {
            return Err(BackplaneError::AlreadyInitialized);
        }
        let state = &mut *guard;
        let now = inner.clock.now_utc();

        match migrate_legacy_keys(&inner.store).await {
            Ok(true) => info!("migrated legacy cache keys"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to migrate legacy cache keys"),
        }

        state.cache = MessageCache::new(config.cache_max);
        state.tracker = ExpectationTracker::new(config.intervals);
        state.scheduler = PollScheduler::new(Duration::from_secs(config.watchdog_secs));
        state.processor = ResponseProcessor::new(filter);

        let mut identity = ChannelIdentity::new(&config, now);
        identity.load(&inner.store, now).await;
        let resolution = identity.resolve(&inner.store, &mut state.cache, now).await;

        info!(
            bus = %config.bus_name,
            server_channel = config.server_channel,
            cache_max = config.cache_max,
            "client initialized"
        );
        state.identity = Some(identity);
        state.config = Some(config);
        inner.apply_resolution(state, resolution);
        Ok(())
    }

    /// Register a callback for every delivered message.
    ///
    /// The first subscriber starts polling. If a batch has already been
    /// processed, the callback is replayed the cache before this returns.
    pub async fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId, BackplaneError>
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.add_subscriber(Arc::new(callback)).await
    }

    /// Subscribe with an unbounded channel instead of a callback.
    pub async fn subscribe_channel(
        &self,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<ChannelMessage>), BackplaneError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe(move |message: &ChannelMessage| {
                let _ = tx.send(message.clone());
            })
            .await?;
        Ok((id, rx))
    }

    async fn add_subscriber(
        &self,
        callback: SubscriberCallback,
    ) -> Result<SubscriptionId, BackplaneError> {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        if state.config.is_none() {
            return Err(BackplaneError::NotInitialized);
        }

        let (id, first) = state.registry.add(Arc::clone(&callback));
        if first {
            inner.start_scheduler(state);
        }
        if state.processor.first_frame_received() {
            for message in state.cache.replay() {
                callback(&message);
            }
        }
        debug!(%id, subscribers = state.registry.len(), "subscribed");
        Ok(id)
    }

    /// Remove a subscriber. Returns false for an unknown id.
    ///
    /// Removing the last subscriber stops polling.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, BackplaneError> {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        if state.config.is_none() {
            return Err(BackplaneError::NotInitialized);
        }

        let removed = state.registry.remove(&id);
        if removed && state.registry.is_empty() {
            inner.stop_scheduler(state);
        }
        Ok(removed)
    }

    /// Expect messages of any of `types` within the default 60 second window.
    pub async fn expect_messages<I, M>(&self, types: I) -> Result<(), BackplaneError>
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        let types = types.into_iter().map(Into::into).collect();
        self.expect_messages_within(DEFAULT_EXPECT_SECS, Some(types))
            .await
    }

    /// Poll fast for the next `seconds`. With `types = None` the window is
    /// held open for its whole length; otherwise it closes early once a
    /// message of one of the types arrives.
    pub async fn expect_messages_within(
        &self,
        seconds: u64,
        types: Option<Vec<String>>,
    ) -> Result<(), BackplaneError> {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        if guard.config.is_none() {
            return Err(BackplaneError::NotInitialized);
        }
        if seconds == 0 {
            return Err(BackplaneError::InvalidInterval);
        }

        guard
            .tracker
            .declare(inner.clock.now_secs(), seconds, types);
        inner.request(&mut guard);
        Ok(())
    }

    /// Drop the current channel and cache, and resolve a new channel.
    ///
    /// Polling restarts from scratch: the first batch on the new channel is
    /// treated as a backlog again.
    pub async fn reset_channel(&self) -> Result<(), BackplaneError> {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        let Some(identity) = state.identity.as_mut() else {
            return Err(BackplaneError::NotInitialized);
        };

        let bus_name = identity.bus_name().to_string();
        let now = inner.clock.now_utc();
        state.scheduler.cancel_timers();
        state.processor.reset_cursor();
        state.resolve_generation += 1;

        let resolution = identity.reset(&inner.store, &mut state.cache, now).await;
        inner.events.publish(ClientEvent::ChannelReset { bus_name });
        inner.events.publish(ClientEvent::CacheInvalidated);
        inner.apply_resolution(state, resolution);
        Ok(())
    }

    /// Run `listener` with the channel id once the channel is resolved.
    ///
    /// Runs immediately when a channel is already available. Listeners
    /// registered earlier run first.
    pub async fn on_init<F>(&self, listener: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut state = self.inner.state.lock().await;
        if state.initialized {
            if let Some(channel) = state.channel() {
                listener(&channel.channel_id);
                return;
            }
        }
        state.init_listeners.push(Box::new(listener));
    }

    /// Wait until a channel is available and return its id.
    pub async fn ready(&self) -> Option<String> {
        let mut rx = self.inner.phase.subscribe();
        if rx.wait_for(|phase| phase.is_ready()).await.is_err() {
            return None;
        }
        self.channel_id().await
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    /// Full retrieval URL of the current channel.
    pub async fn channel_id(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.channel().map(|channel| channel.channel_id.clone())
    }

    pub async fn channel(&self) -> Option<Channel> {
        let state = self.inner.state.lock().await;
        state.channel().cloned()
    }

    pub async fn config(&self) -> Option<BackplaneConfig> {
        self.inner.state.lock().await.config.clone()
    }

    /// Cached messages, oldest first.
    pub async fn cached_messages(&self) -> Vec<ChannelMessage> {
        self.inner.state.lock().await.cache.replay()
    }

    pub async fn cursor(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.processor.cursor().map(str::to_string)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.state.lock().await.registry.len()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Stop polling, drop every subscriber, and abandon any channel request.
    ///
    /// Retrievals already in flight are not aborted; their results are still
    /// processed but nothing is rescheduled.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let mut guard = inner.state.lock().await;
        let state = &mut *guard;
        state.resolve_generation += 1;
        state.registry.clear();
        inner.stop_scheduler(state);
        info!("client shut down");
    }
}

impl<T, S> ClientInner<T, S>
where
    T: RetrievalTransport + 'static,
    S: StateStore + 'static,
{
    pub(crate) fn refresh_phase(&self, state: &ClientState) {
        let phase = state.phase();
        self.phase.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    fn apply_resolution(self: &Arc<Self>, state: &mut ClientState, resolution: Resolution) {
        match resolution {
            Resolution::Ready { channel, fresh } => self.finish_init(state, channel, fresh),
            Resolution::AwaitingServer(request) => {
                self.refresh_phase(state);
                self.spawn_channel_request(state, request);
            }
        }
    }

    fn finish_init(self: &Arc<Self>, state: &mut ClientState, channel: Channel, fresh: bool) {
        state.initialized = true;
        self.refresh_phase(state);
        info!(
            bus = %channel.bus_name,
            channel_id = %channel.channel_id,
            fresh,
            "channel resolved"
        );
        self.events.publish(ClientEvent::ChannelResolved {
            bus_name: channel.bus_name.clone(),
            channel_id: channel.channel_id.clone(),
            fresh,
        });

        for listener in std::mem::take(&mut state.init_listeners) {
            listener(&channel.channel_id);
        }
        self.request(state);
    }

    fn spawn_channel_request(self: &Arc<Self>, state: &mut ClientState, request: ChannelRequest) {
        state.resolve_generation += 1;
        let generation = state.resolve_generation;
        debug!(endpoint = %request.endpoint, "requesting channel from server");
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.request_channel(request, generation).await });
    }

    /// Ask the server for a channel name until one arrives or a newer
    /// resolution supersedes this one.
    async fn request_channel(self: Arc<Self>, request: ChannelRequest, generation: u64) {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let result = self
                .transport
                .fetch_channel_name(&request)
                .await
                .and_then(|name| {
                    let name = name.trim();
                    if name.is_empty() {
                        Err(TransportError::Decode("empty channel name".to_string()))
                    } else {
                        Ok(name.to_string())
                    }
                });

            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.resolve_generation != generation {
                debug!(attempt, "channel request superseded");
                return;
            }

            match result {
                Ok(name) => {
                    let now = self.clock.now_utc();
                    let Some(identity) = state.identity.as_mut() else {
                        return;
                    };
                    let channel = identity.complete(&self.store, &name, now).await;
                    self.finish_init(state, channel, true);
                    return;
                }
                Err(e) => {
                    let delay = channel_retry_delay(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "channel request failed"
                    );
                    self.events.publish(ClientEvent::ChannelRequestFailed {
                        attempt,
                        error: e.to_string(),
                    });
                    drop(guard);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Linear backoff: one second per attempt, capped.
pub fn channel_retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt).clamp(1, CHANNEL_RETRY_CAP_SECS))
}
