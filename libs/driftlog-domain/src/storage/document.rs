use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventId, Payload};

/// Stored form of an Event
///
/// A separate copy of the event's fields, keyed by `id` (the event identifier)
/// and stamped with the time of the write that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: EventId,
    pub source: String,
    pub event_type: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl StoredDocument {
    pub fn from_event(event: &Event, stored_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id().clone(),
            source: event.source().to_string(),
            event_type: event.event_type().to_string(),
            payload: event.payload().clone(),
            timestamp: *event.timestamp(),
            stored_at,
        }
    }
}
