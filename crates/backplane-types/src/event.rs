//! Lifecycle events for the client event bus.
//!
//! `ClientEvent` is broadcast by the session as it resolves channels,
//! schedules polls, and processes batches. All variants are Clone + Send +
//! Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};

/// Events emitted by a running client session.
///
/// Consumed by the CLI for verbose output and by tests that need to wait on
/// scheduler progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A channel is ready to be polled.
    ChannelResolved {
        bus_name: String,
        channel_id: String,
        /// True when the name was newly assigned rather than restored.
        fresh: bool,
    },

    /// The channel identity was dropped and is being replaced.
    ChannelReset { bus_name: String },

    /// A server-assigned channel request failed and will be retried.
    ChannelRequestFailed { attempt: u32, error: String },

    /// The scheduler started because the first subscriber arrived.
    SchedulerStarted,

    /// The scheduler stopped because the last subscriber left.
    SchedulerStopped,

    /// The next poll was scheduled.
    PollScheduled { delay_ms: u64 },

    /// A network retrieval was issued.
    PollIssued { since: Option<String> },

    /// A persisted cache was fed to the processor instead of the network.
    CacheReplayed { count: usize },

    /// The cache was invalidated wholesale.
    CacheInvalidated,

    /// A batch was processed.
    BatchProcessed {
        received: usize,
        delivered: usize,
        cursor: String,
    },

    /// A response arrived for a channel or cursor that has since moved on.
    StaleResponseDiscarded { received: usize },

    /// A retrieval failed at the transport level.
    TransportFailed { error: String },

    /// A retrieval did not complete in time and was re-issued.
    WatchdogFired,
}
