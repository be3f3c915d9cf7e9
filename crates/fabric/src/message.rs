use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use weft_protocol::{Priority, frame::now_ms};

/// Unique message identifier (uuid v4 under the hood).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable fabric message.
///
/// Once constructed a message is never mutated; transformations produce
/// derived values via [`Message::with_content`], which keep the id (same
/// logical message) but are new values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    /// Absent recipient means broadcast.
    pub recipient: Option<String>,
    pub content: String,
    pub priority: Priority,
    pub timestamp: u64,
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(sender: &str, recipient: Option<&str>, content: &str) -> Self {
        Self {
            id: MessageId::generate(),
            sender: sender.to_string(),
            recipient: recipient.map(str::to_string),
            content: content.to_string(),
            priority: Priority::Normal,
            timestamp: now_ms(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Derive a new message value with transformed content.
    pub fn with_content(&self, content: String) -> Self {
        let mut derived = self.clone();
        derived.content = content;
        derived
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Message::new("a", Some("b"), "x");
        let b = Message::new("a", Some("b"), "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn derived_message_keeps_id() {
        let original = Message::new("a", Some("b"), "secret token inside");
        let redacted = original.with_content("[redacted] inside".into());
        assert_eq!(original.id, redacted.id);
        assert_eq!(original.content, "secret token inside");
        assert_eq!(redacted.content, "[redacted] inside");
    }

    #[test]
    fn missing_recipient_means_broadcast() {
        assert!(Message::new("a", None, "x").is_broadcast());
        assert!(!Message::new("a", Some("b"), "x").is_broadcast());
    }
}
