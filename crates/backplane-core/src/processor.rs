//! Response processing.
//!
//! Turns a retrieved batch into deliveries: advance the cursor, decide what
//! to deliver (the first batch on a channel is a backlog and is dropped
//! unless a frame filter picks from it), fan out to subscribers, record into
//! the cache, and satisfy pending expectations.

use std::sync::Arc;

use backplane_types::event::ClientEvent;
use backplane_types::message::ChannelMessage;
use tracing::{debug, warn};

use crate::cache::MessageCache;
use crate::expectation::ExpectationTracker;
use crate::session::{ClientInner, ClientState};
use crate::storage::StateStore;
use crate::subscriber::SubscriberRegistry;
use crate::transport::RetrievalTransport;

/// Chooses what to deliver from the first batch on a channel.
pub type FrameFilter = Arc<dyn Fn(Vec<ChannelMessage>) -> Vec<ChannelMessage> + Send + Sync>;

/// Summary of one processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub received: usize,
    pub delivered: usize,
    /// Messages written to the cache.
    pub recorded: usize,
    pub cursor: String,
}

pub struct ResponseProcessor {
    cursor: Option<String>,
    first_frame_received: bool,
    init_frame_filter: Option<FrameFilter>,
}

impl ResponseProcessor {
    pub fn new(init_frame_filter: Option<FrameFilter>) -> Self {
        Self {
            cursor: None,
            first_frame_received: false,
            init_frame_filter,
        }
    }

    /// Id of the last consumed message. `Some("")` once a batch was handled
    /// but no message has arrived yet.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn first_frame_received(&self) -> bool {
        self.first_frame_received
    }

    /// Forget the cursor so the next batch is treated as a backlog again.
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    /// Advance the cursor and deliver `batch`.
    pub fn process(
        &mut self,
        batch: Vec<ChannelMessage>,
        registry: &SubscriberRegistry,
        cache: &mut MessageCache,
        tracker: &mut ExpectationTracker,
    ) -> ProcessOutcome {
        let received = batch.len();
        let cursor = batch
            .last()
            .map(|message| message.id.clone())
            .or_else(|| self.cursor.clone())
            .unwrap_or_default();

        let deliver = if self.cursor.is_some() {
            batch
        } else {
            match &self.init_frame_filter {
                Some(filter) => filter(batch),
                None => {
                    debug!(discarded = received, "discarding backlog on new channel");
                    Vec::new()
                }
            }
        };
        self.cursor = Some(cursor.clone());

        let mut recorded = 0;
        for message in &deliver {
            registry.notify(message);
            if cache.max() > 0 {
                cache.record(message.clone());
                recorded += 1;
            }
            if let Some(message_type) = message.message_type() {
                tracker.satisfy(message_type);
            }
        }

        ProcessOutcome {
            received,
            delivered: deliver.len(),
            recorded,
            cursor,
        }
    }

    pub fn mark_first_frame(&mut self) {
        self.first_frame_received = true;
    }
}

impl std::fmt::Debug for ResponseProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseProcessor")
            .field("cursor", &self.cursor)
            .field("first_frame_received", &self.first_frame_received)
            .field("has_filter", &self.init_frame_filter.is_some())
            .finish()
    }
}

impl<T, S> ClientInner<T, S>
where
    T: RetrievalTransport + 'static,
    S: StateStore + 'static,
{
    /// Process a batch and schedule the next poll.
    pub(crate) async fn handle_batch(
        self: &Arc<Self>,
        state: &mut ClientState,
        batch: Vec<ChannelMessage>,
    ) {
        state.scheduler.cancel_watchdog();

        let outcome = {
            let ClientState {
                processor,
                registry,
                cache,
                tracker,
                ..
            } = &mut *state;
            processor.process(batch, registry, cache, tracker)
        };

        if outcome.recorded > 0 {
            if let Err(e) = state.cache.persist(&self.store, self.clock.now_utc()).await {
                warn!(error = %e, "failed to persist message cache");
            }
        }
        state.processor.mark_first_frame();

        debug!(
            received = outcome.received,
            delivered = outcome.delivered,
            cursor = %outcome.cursor,
            "batch processed"
        );
        self.events.publish(ClientEvent::BatchProcessed {
            received: outcome.received,
            delivered: outcome.delivered,
            cursor: outcome.cursor,
        });
        self.request(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::msg;
    use backplane_types::config::PollIntervals;
    use std::sync::Mutex;

    struct Harness {
        registry: SubscriberRegistry,
        cache: MessageCache,
        tracker: ExpectationTracker,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(cache_max: usize) -> Self {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let mut registry = SubscriberRegistry::new();
            registry.add(Arc::new(move |m: &ChannelMessage| {
                sink.lock().unwrap().push(m.id.clone())
            }));
            Self {
                registry,
                cache: MessageCache::new(cache_max),
                tracker: ExpectationTracker::new(PollIntervals::default()),
                seen,
            }
        }

        fn run(&mut self, processor: &mut ResponseProcessor, batch: Vec<ChannelMessage>) -> ProcessOutcome {
            processor.process(batch, &self.registry, &mut self.cache, &mut self.tracker)
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_first_batch_discarded_without_filter() {
        let mut h = Harness::new(5);
        let mut processor = ResponseProcessor::new(None);

        let outcome = h.run(&mut processor, vec![msg("1", "a"), msg("2", "b")]);
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.cursor, "2");
        assert!(h.seen().is_empty());
        assert!(h.cache.is_empty());

        h.run(&mut processor, vec![msg("3", "c")]);
        assert_eq!(h.seen(), vec!["3"]);
    }

    #[test]
    fn test_filter_output_is_delivered_exactly() {
        let mut h = Harness::new(5);
        let filter: FrameFilter = Arc::new(|batch: Vec<ChannelMessage>| {
            batch.into_iter().filter(|m| m.message_type() == Some("keep")).collect()
        });
        let mut processor = ResponseProcessor::new(Some(filter));

        let outcome = h.run(
            &mut processor,
            vec![msg("1", "keep"), msg("2", "drop"), msg("3", "keep")],
        );
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.cursor, "3");
        assert_eq!(h.seen(), vec!["1", "3"]);
    }

    #[test]
    fn test_empty_batch_keeps_cursor() {
        let mut h = Harness::new(5);
        let mut processor = ResponseProcessor::new(None);

        let outcome = h.run(&mut processor, Vec::new());
        assert_eq!(outcome.cursor, "");
        assert_eq!(processor.cursor(), Some(""));

        h.run(&mut processor, vec![msg("9", "x")]);
        let outcome = h.run(&mut processor, Vec::new());
        assert_eq!(outcome.cursor, "9");
    }

    #[test]
    fn test_zero_cache_max_records_nothing() {
        let mut h = Harness::new(0);
        let mut processor = ResponseProcessor::new(None);
        h.run(&mut processor, Vec::new());

        let outcome = h.run(&mut processor, vec![msg("1", "a")]);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.recorded, 0);
    }

    #[test]
    fn test_delivered_types_satisfy_expectations() {
        let mut h = Harness::new(5);
        let mut processor = ResponseProcessor::new(None);
        h.run(&mut processor, Vec::new());

        h.tracker.declare(0, 10, Some(vec!["ping".to_string()]));
        h.run(&mut processor, vec![msg("1", "pong")]);
        assert_eq!(h.tracker.pending(), 1);
        h.run(&mut processor, vec![msg("2", "ping")]);
        assert_eq!(h.tracker.pending(), 0);
    }

    #[test]
    fn test_reset_cursor_restarts_backlog_handling() {
        let mut h = Harness::new(5);
        let mut processor = ResponseProcessor::new(None);
        h.run(&mut processor, Vec::new());
        processor.mark_first_frame();

        processor.reset_cursor();
        assert!(!processor.has_cursor());
        assert!(processor.first_frame_received());

        let outcome = h.run(&mut processor, vec![msg("1", "a")]);
        assert_eq!(outcome.delivered, 0);
    }
}
