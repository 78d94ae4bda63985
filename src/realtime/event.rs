//! Control channel events and the session event log

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Result;

/// Client event adding an item to the conversation
pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";

/// Client event asking the remote to generate a response
pub const RESPONSE_CREATE: &str = "response.create";

/// A structured message exchanged over the control channel
///
/// The `type` tag and optional `event_id` are typed; every other field is kept
/// verbatim in `payload` so unknown server events survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Semantic kind of the event (e.g. `"response.done"`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Unique identifier, assigned locally for client events when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Type-specific fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event of the given kind with an empty payload
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            event_id: None,
            payload: Map::new(),
        }
    }

    /// Return this event with an extra payload field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Build a turn-creation event carrying `text` as user input
    #[must_use]
    pub fn user_text(text: &str) -> Self {
        Self::new(CONVERSATION_ITEM_CREATE).with_field(
            "item",
            serde_json::json!({
                "type": "message",
                "role": "user",
                "content": [
                    {
                        "type": "input_text",
                        "text": text,
                    }
                ],
            }),
        )
    }

    /// Build a response-request event
    #[must_use]
    pub fn response_create() -> Self {
        Self::new(RESPONSE_CREATE)
    }

    /// Assign a fresh `event_id` if none is set and return it
    pub fn ensure_id(&mut self) -> &str {
        self.event_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .as_str()
    }

    /// Parse an event received on the wire
    ///
    /// # Errors
    ///
    /// Returns error if the message is not a JSON object with a `type` field
    pub fn from_wire(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize for transmission
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Text of the first user input item, if this is a text turn
    #[must_use]
    pub fn input_text(&self) -> Option<&str> {
        self.payload
            .get("item")?
            .get("content")?
            .get(0)?
            .get("text")?
            .as_str()
    }
}

/// Append-only event log, most recent first
///
/// Owned by the orchestrator; cleared whenever a session becomes active.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: VecDeque<Event>,
}

impl EventLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event at the front of the log
    pub fn record(&mut self, event: Event) {
        self.events.push_front(event);
    }

    /// Drop every recorded event
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Most recent event
    #[must_use]
    pub fn latest(&self) -> Option<&Event> {
        self.events.front()
    }

    /// Iterate newest first
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Number of recorded events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Copy the log out, newest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }
}
