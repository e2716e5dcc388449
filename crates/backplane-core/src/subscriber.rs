//! Subscriber registry.
//!
//! Holds the callbacks messages are fanned out to. Occupancy drives the poll
//! scheduler: the session starts it on the first `add` and stops it when the
//! last subscriber is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use backplane_types::message::ChannelMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Callback invoked for every delivered message.
///
/// Callbacks run while the session lock is held. They must not block, and a
/// callback that wants to call back into the client must spawn to do so.
pub type SubscriberCallback = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

/// Opaque handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<SubscriptionId, SubscriberCallback>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. The flag is true when this is the first subscriber.
    pub fn add(&mut self, callback: SubscriberCallback) -> (SubscriptionId, bool) {
        let first = self.subscribers.is_empty();
        let id = SubscriptionId::new();
        self.subscribers.insert(id, callback);
        (id, first)
    }

    /// Returns false for an unknown id.
    pub fn remove(&mut self, id: &SubscriptionId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Deliver one message to every subscriber. Order across subscribers is
    /// unspecified.
    pub fn notify(&self, message: &ChannelMessage) {
        for callback in self.subscribers.values() {
            callback(message);
        }
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
