//! Poll scheduling with a watchdog.
//!
//! `PollScheduler` owns the two timers of the polling loop as
//! `CancellationToken`s: the regular timer that fires the next retrieval, and
//! the watchdog armed when a retrieval is issued. If the watchdog fires
//! before a batch is handled, scheduling is re-entered and the retrieval is
//! retried. Re-entering always cancels and replaces both timers.
//!
//! The loop itself (`request` -> `fire` -> `on_response`) runs on the
//! session, since every step needs the session state.

use std::sync::Arc;
use std::time::Duration;

use backplane_types::config::DEFAULT_WATCHDOG_SECS;
use backplane_types::event::ClientEvent;
use backplane_types::message::ChannelMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{ClientInner, ClientState};
use crate::storage::StateStore;
use crate::transport::{RetrievalRequest, RetrievalTransport};

#[derive(Debug)]
pub struct PollScheduler {
    running: bool,
    watchdog_after: Duration,
    regular: Option<CancellationToken>,
    watchdog: Option<CancellationToken>,
}

impl PollScheduler {
    pub fn new(watchdog_after: Duration) -> Self {
        Self {
            running: false,
            watchdog_after,
            regular: None,
            watchdog: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn watchdog_after(&self) -> Duration {
        self.watchdog_after
    }

    /// Returns true if the scheduler was stopped before.
    pub fn start(&mut self) -> bool {
        let started = !self.running;
        self.running = true;
        started
    }

    /// Stop scheduling and cancel both timers. In-flight retrievals are not
    /// aborted. Returns true if the scheduler was running.
    pub fn stop(&mut self) -> bool {
        self.cancel_timers();
        let stopped = self.running;
        self.running = false;
        stopped
    }

    pub fn cancel_timers(&mut self) {
        if let Some(token) = self.regular.take() {
            token.cancel();
        }
        self.cancel_watchdog();
    }

    pub fn cancel_watchdog(&mut self) {
        if let Some(token) = self.watchdog.take() {
            token.cancel();
        }
    }

    /// Replace both timers with a fresh regular timer.
    pub fn arm_regular(&mut self) -> CancellationToken {
        self.cancel_timers();
        let token = CancellationToken::new();
        self.regular = Some(token.clone());
        token
    }

    pub fn arm_watchdog(&mut self) -> CancellationToken {
        self.cancel_watchdog();
        let token = CancellationToken::new();
        self.watchdog = Some(token.clone());
        token
    }

    /// True while a regular timer is armed and not yet cancelled.
    pub fn has_pending_poll(&self) -> bool {
        self.regular.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_WATCHDOG_SECS))
    }
}

// ---------------------------------------------------------------------------
// Polling loop
// ---------------------------------------------------------------------------

impl<T, S> ClientInner<T, S>
where
    T: RetrievalTransport + 'static,
    S: StateStore + 'static,
{
    pub(crate) fn start_scheduler(self: &Arc<Self>, state: &mut ClientState) {
        if !state.scheduler.start() {
            return;
        }
        info!("polling started");
        self.events.publish(ClientEvent::SchedulerStarted);
        self.refresh_phase(state);
        self.request(state);
    }

    pub(crate) fn stop_scheduler(&self, state: &mut ClientState) {
        if !state.scheduler.stop() {
            return;
        }
        info!("polling stopped");
        self.events.publish(ClientEvent::SchedulerStopped);
        self.refresh_phase(state);
    }

    /// Schedule the next retrieval, replacing any pending one.
    ///
    /// No-op until a channel is resolved and while the scheduler is stopped.
    pub(crate) fn request(self: &Arc<Self>, state: &mut ClientState) {
        if state.channel().is_none() || !state.scheduler.is_running() {
            return;
        }

        let delay = state
            .tracker
            .delay(self.clock.now_secs(), state.processor.has_cursor());
        let token = state.scheduler.arm_regular();
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(delay_ms, "next poll scheduled");
        self.events.publish(ClientEvent::PollScheduled { delay_ms });

        let inner = Arc::clone(self);
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.fire(token).await,
            }
        });
    }

    /// The regular timer elapsed: arm the watchdog and retrieve.
    async fn fire(self: Arc<Self>, token: CancellationToken) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if token.is_cancelled() {
            return;
        }

        let watchdog = state.scheduler.arm_watchdog();
        self.spawn_watchdog(watchdog, state.scheduler.watchdog_after());

        if !state.processor.has_cursor() && state.cache.max() > 0 {
            let now = self.clock.now_utc();
            match state.cache.load_if_valid(&self.store, now).await {
                Ok(Some(cached)) => {
                    debug!(count = cached.len(), "using persisted cache instead of retrieval");
                    self.events.publish(ClientEvent::CacheReplayed {
                        count: cached.len(),
                    });
                    self.handle_batch(state, cached).await;
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to read persisted message cache"),
            }
        }

        let Some(channel) = state.channel() else {
            state.scheduler.cancel_watchdog();
            return;
        };
        let request = RetrievalRequest::new(
            channel.channel_id.clone(),
            state.processor.cursor().map(str::to_string),
        );
        drop(guard);

        debug!(since = ?request.since, "retrieving messages");
        self.events.publish(ClientEvent::PollIssued {
            since: request.since.clone(),
        });

        let inner = Arc::clone(&self);
        tokio::spawn(async move {
            match inner.transport.fetch_messages(&request).await {
                Ok(batch) => inner.on_response(request, batch).await,
                Err(e) => {
                    // Left to the watchdog.
                    warn!(error = %e, "retrieval failed");
                    inner.events.publish(ClientEvent::TransportFailed {
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    fn spawn_watchdog(self: &Arc<Self>, token: CancellationToken, after: Duration) {
        let inner = Arc::clone(self);
        let cancelled = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(after) => inner.on_watchdog(token).await,
            }
        });
    }

    async fn on_watchdog(self: Arc<Self>, token: CancellationToken) {
        let mut guard = self.state.lock().await;
        if token.is_cancelled() {
            return;
        }
        warn!("retrieval did not complete in time, retrying");
        self.events.publish(ClientEvent::WatchdogFired);
        self.request(&mut guard);
    }

    /// Handle a completed retrieval unless the session moved on since it was
    /// issued.
    async fn on_response(self: Arc<Self>, request: RetrievalRequest, batch: Vec<ChannelMessage>) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let same_channel = state
            .channel()
            .is_some_and(|channel| channel.channel_id == request.channel_id);
        let same_cursor = state.processor.cursor() == request.since.as_deref();
        if !same_channel || !same_cursor {
            debug!(
                received = batch.len(),
                since = ?request.since,
                "discarding stale response"
            );
            self.events.publish(ClientEvent::StaleResponseDiscarded {
                received: batch.len(),
            });
            return;
        }

        self.handle_batch(state, batch).await;
    }
}
