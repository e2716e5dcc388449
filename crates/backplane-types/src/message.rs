//! Messages as served by a Backplane channel.

use serde::{Deserialize, Serialize};

/// One entry of a retrieved batch: `{"id": "...", "message": {"type": ..., ...}}`.
///
/// Ids are opaque and monotonic as issued by the server; the client never
/// compares or reorders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub message: serde_json::Value,
}

impl ChannelMessage {
    pub fn new(id: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            message,
        }
    }

    /// The payload's `type` field, if it has a string one.
    pub fn message_type(&self) -> Option<&str> {
        self.message.get("type").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type() {
        let msg = ChannelMessage::new("1", json!({"type": "identity/login", "user": "x"}));
        assert_eq!(msg.message_type(), Some("identity/login"));
    }

    #[test]
    fn test_message_type_missing_or_not_string() {
        assert_eq!(ChannelMessage::new("1", json!({"user": "x"})).message_type(), None);
        assert_eq!(ChannelMessage::new("2", json!({"type": 3})).message_type(), None);
        assert_eq!(ChannelMessage::new("3", json!("bare")).message_type(), None);
    }

    #[test]
    fn test_deserialize_server_batch() {
        let raw = r#"[
            {"id": "2011-03-31T08:53:15.001Z-a", "message": {"type": "ping"}},
            {"id": "2011-03-31T08:53:15.002Z-b", "message": {"type": "pong", "n": 2}}
        ]"#;
        let batch: Vec<ChannelMessage> = serde_json::from_str(raw).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "2011-03-31T08:53:15.001Z-a");
        assert_eq!(batch[1].message_type(), Some("pong"));
        assert_eq!(batch[1].message["n"], 2);
    }
}
