//! In-memory doubles for the storage and transport ports.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use backplane_types::error::{RepositoryError, TransportError};
use backplane_types::message::ChannelMessage;
use serde_json::json;

use crate::storage::StateStore;
use crate::transport::{ChannelRequest, RetrievalRequest, RetrievalTransport};

pub fn msg(id: &str, kind: &str) -> ChannelMessage {
    ChannelMessage::new(id, json!({ "type": kind }))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: serde_json::Value) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }
}

impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.snapshot(key))
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        self.put(key, value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

/// What the scripted transport does for one retrieval.
#[derive(Debug, Clone)]
pub enum Scripted {
    Batch(Vec<ChannelMessage>),
    Delayed(Duration, Vec<ChannelMessage>),
    Fail(String),
    /// Never completes.
    Stall,
}

/// Plays back retrieval and channel-assignment results in order.
///
/// Once the script runs out, retrievals return empty batches.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    retrievals: Mutex<VecDeque<Scripted>>,
    channel_names: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<RetrievalRequest>>,
    channel_requests: Mutex<Vec<ChannelRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retrievals(script: impl IntoIterator<Item = Scripted>) -> Self {
        let transport = Self::new();
        transport.retrievals.lock().unwrap().extend(script);
        transport
    }

    pub fn push_retrieval(&self, step: Scripted) {
        self.retrievals.lock().unwrap().push_back(step);
    }

    pub fn push_channel_name(&self, result: Result<&str, &str>) {
        self.channel_names
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string).map_err(str::to_string));
    }

    pub fn requests(&self) -> Vec<RetrievalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn channel_request_count(&self) -> usize {
        self.channel_requests.lock().unwrap().len()
    }
}

impl RetrievalTransport for ScriptedTransport {
    async fn fetch_messages(
        &self,
        request: &RetrievalRequest,
    ) -> Result<Vec<ChannelMessage>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.retrievals.lock().unwrap().pop_front();
        match step {
            None => Ok(Vec::new()),
            Some(Scripted::Batch(batch)) => Ok(batch),
            Some(Scripted::Delayed(after, batch)) => {
                tokio::time::sleep(after).await;
                Ok(batch)
            }
            Some(Scripted::Fail(error)) => Err(TransportError::Http(error)),
            Some(Scripted::Stall) => std::future::pending().await,
        }
    }

    async fn fetch_channel_name(&self, request: &ChannelRequest) -> Result<String, TransportError> {
        self.channel_requests.lock().unwrap().push(request.clone());
        let next = self.channel_names.lock().unwrap().pop_front();
        match next {
            Some(Ok(name)) => Ok(name),
            Some(Err(error)) => Err(TransportError::Http(error)),
            None => Err(TransportError::Http("no channel scripted".to_string())),
        }
    }
}
