//! Diagnostic event log.
//!
//! Every observable step of the session (transitions, acknowledgements,
//! failures) is recorded as an [`Event`]. The [`EventLog`] keeps the 100 most
//! recent ones, newest first.

use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Number of events retained by the log.
pub const EVENT_LOG_CAPACITY: usize = 100;

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Connection,
    Subscription,
    Publish,
    Receive,
    Error,
    Debug,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Connection => "Connection",
            EventCategory::Subscription => "Subscription",
            EventCategory::Publish => "Publish",
            EventCategory::Receive => "Receive",
            EventCategory::Error => "Error",
            EventCategory::Debug => "Debug",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub category: EventCategory,
    pub message: String,
    pub details: Option<String>,
}

impl Event {
    pub fn new(category: EventCategory, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: OffsetDateTime::now_utc(),
            category,
            message: message.into(),
            details,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details.replace('\n', ", "))?;
        }
        Ok(())
    }
}

/// Bounded, newest-first event history.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<Event>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Inserts at the front and drops the oldest entries beyond capacity.
    pub fn push(&mut self, event: Event) {
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent event.
    pub fn latest(&self) -> Option<&Event> {
        self.entries.front()
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.entries.get(index)
    }

    /// Iterates newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    /// Copy of the log, newest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
