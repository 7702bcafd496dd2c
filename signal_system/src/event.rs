//! Change event types and definitions
//!
//! This module defines the structure of change events
//! that flow from an upstream change channel to subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single row as delivered by the remote store: column name to JSON value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Kind of change observed upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "INSERT",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-level change event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: EventType,
    /// Table name
    pub table_name: String,
    /// Row after the change (absent for deletes)
    pub new: Option<Record>,
    /// Row before the change (absent for inserts, and for updates when the upstream does not send it)
    pub old: Option<Record>,
    /// Event timestamp (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChangeEvent {
    pub fn new(event_type: EventType, table_name: impl Into<String>) -> Self {
        Self {
            event_type,
            table_name: table_name.into(),
            new: None,
            old: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_new(mut self, record: Record) -> Self {
        self.new = Some(record);
        self
    }

    pub fn with_old(mut self, record: Record) -> Self {
        self.old = Some(record);
        self
    }

    /// The row this event is about: the new image if present, the old one otherwise
    pub fn record(&self) -> Option<&Record> {
        self.new.as_ref().or(self.old.as_ref())
    }
}
