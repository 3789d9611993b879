//! Chat message history.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Sender label stamped on every inbound message.
pub const REMOTE_SENDER: &str = "Remote";

/// A chat message, sent or received. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub topic: String,
    pub sender: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_outgoing: bool,
    pub qos: u8,
    pub is_retained: bool,
}

impl Message {
    /// A message this client is sending.
    pub fn outgoing(
        content: impl Into<String>,
        topic: impl Into<String>,
        sender: impl Into<String>,
        qos: u8,
        retained: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            topic: topic.into(),
            sender: sender.into(),
            timestamp: OffsetDateTime::now_utc(),
            is_outgoing: true,
            qos,
            is_retained: retained,
        }
    }

    /// A message delivered by the broker.
    ///
    /// Inbound messages are recorded with the locally configured QoS and
    /// `is_retained = false`, whatever the broker reported.
    pub fn incoming(content: impl Into<String>, topic: impl Into<String>, qos: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            topic: topic.into(),
            sender: REMOTE_SENDER.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            is_outgoing: false,
            qos,
            is_retained: false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.is_outgoing { ">" } else { "<" };
        write!(f, "{arrow} {}@{}: {}", self.sender, self.topic, self.content)
    }
}

/// Ordered history of sent and received messages.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }
}
