//! Domain entities for ingested events
//!
//! A `RawEvent` is what a producer submits. An `Event` is the validated,
//! identified and immutable unit that flows through the pipeline. The only
//! ways to obtain an `Event` are validation of a `RawEvent` and decoding of a
//! wire record whose identifier checks out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{derive_event_id, EventId};
use super::payload::{payload_depth, Payload};
use crate::ingestion::IngestionError;

/// Event as submitted by a producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Producer identifier
    pub source: String,
    /// Event category, also used for topic routing
    pub event_type: String,
    /// Event body
    #[serde(default)]
    pub payload: Payload,
    /// Creation time; ingestion time is used when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawEvent {
    /// Create a raw event without a timestamp
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            payload,
            timestamp: None,
        }
    }

    /// Set an explicit creation time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Field constraints applied when a `RawEvent` becomes an `Event`
#[derive(Debug, Clone)]
pub struct EventRules {
    /// How far in the future a timestamp may be (default: 5 minutes)
    pub max_future_skew: Duration,
    /// Maximum length of `source` and `event_type` (default: 256)
    pub max_field_len: usize,
    /// Maximum payload nesting depth, top-level map included (default: 32)
    pub max_payload_depth: usize,
}

impl Default for EventRules {
    fn default() -> Self {
        Self {
            max_future_skew: Duration::from_secs(300),
            max_field_len: 256,
            max_payload_depth: 32,
        }
    }
}

/// A validated, immutable event with its derived identifier
///
/// # Example
///
/// ```rust
/// use driftlog_domain::event::{Event, EventRules, RawEvent};
///
/// let raw = RawEvent::new("svc1", "login", Default::default());
/// let event = Event::from_raw(raw, &EventRules::default(), chrono::Utc::now()).unwrap();
/// println!("Event {} from {}", event.id(), event.source());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventRecord")]
pub struct Event {
    event_id: EventId,
    source: String,
    event_type: String,
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Validate a raw event and derive its identifier
    ///
    /// # Arguments
    ///
    /// * `raw` - Producer input
    /// * `rules` - Field constraints
    /// * `now` - Current time, used as the default timestamp and for the skew check
    ///
    /// # Errors
    ///
    /// - `IngestionError::Validation` if any field constraint is violated
    /// - `IngestionError::Serialization` if the payload cannot be canonicalized
    pub fn from_raw(
        raw: RawEvent,
        rules: &EventRules,
        now: DateTime<Utc>,
    ) -> Result<Self, IngestionError> {
        let source = raw.source.trim().to_string();
        let event_type = raw.event_type.trim().to_string();

        check_field("source", &source, rules.max_field_len)?;
        check_field("event_type", &event_type, rules.max_field_len)?;

        if let Some(bad) = event_type
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(IngestionError::validation(format!(
                "event_type contains '{}'; only [A-Za-z0-9._-] are allowed",
                bad
            )));
        }

        let timestamp = raw.timestamp.unwrap_or(now);
        // A bound past the end of representable time means no upper bound
        let latest = chrono::Duration::from_std(rules.max_future_skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew));
        if latest.is_some_and(|latest| timestamp > latest) {
            return Err(IngestionError::validation(format!(
                "timestamp {} is more than {}s in the future",
                timestamp.to_rfc3339(),
                rules.max_future_skew.as_secs()
            )));
        }

        let depth = payload_depth(&raw.payload);
        if depth > rules.max_payload_depth {
            return Err(IngestionError::validation(format!(
                "payload nesting depth {} exceeds maximum {}",
                depth, rules.max_payload_depth
            )));
        }

        let event_id = derive_event_id(&source, &event_type, &raw.payload, &timestamp)?;

        Ok(Self {
            event_id,
            source,
            event_type,
            payload: raw.payload,
            timestamp,
        })
    }

    /// Get the event's content-derived identifier
    pub fn id(&self) -> &EventId {
        &self.event_id
    }

    /// Get the producer identifier
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the event category
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Get the payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Get the creation timestamp
    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }
}

fn check_field(name: &str, value: &str, max_len: usize) -> Result<(), IngestionError> {
    if value.is_empty() {
        return Err(IngestionError::validation(format!("{} must not be empty", name)));
    }
    if value.len() > max_len {
        return Err(IngestionError::validation(format!(
            "{} is {} bytes long, maximum is {}",
            name,
            value.len(),
            max_len
        )));
    }
    Ok(())
}

/// Wire shape of an Event, checked on the way in
#[derive(Deserialize)]
struct EventRecord {
    event_id: EventId,
    source: String,
    event_type: String,
    #[serde(default)]
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl TryFrom<EventRecord> for Event {
    type Error = IngestionError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let expected = derive_event_id(
            &record.source,
            &record.event_type,
            &record.payload,
            &record.timestamp,
        )?;

        if expected != record.event_id {
            return Err(IngestionError::validation(format!(
                "event id {} does not match its content (expected {})",
                record.event_id, expected
            )));
        }

        Ok(Self {
            event_id: record.event_id,
            source: record.source,
            event_type: record.event_type,
            payload: record.payload,
            timestamp: record.timestamp,
        })
    }
}
