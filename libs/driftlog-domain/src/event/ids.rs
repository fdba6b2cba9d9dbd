use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use super::payload::{Payload, PayloadValue};
use crate::ingestion::IngestionError;

/// Content-derived identifier of an Event
///
/// A 64 character lowercase hex rendering of the SHA-256 digest of the event's
/// canonical form. Identical inputs always produce the same EventId, which is
/// what makes redelivered events collapse into one stored document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Length of the hex rendering
    pub const LEN: usize = 64;

    /// Wrap an existing hex digest, checking its shape
    pub fn parse(hex_digest: &str) -> Option<Self> {
        let well_formed = hex_digest.len() == Self::LEN
            && hex_digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(hex_digest.to_string()))
    }

    /// Get the hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one flushed batch
///
/// Wrapper around UUID v7 so batch reports sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a new BatchId
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the identifier of an event from its content
///
/// Pure function: the same `(source, event_type, payload, timestamp)` always
/// yields the same identifier.
///
/// # Errors
///
/// Returns `IngestionError::Serialization` if the payload holds a value with no
/// canonical form (NaN or infinite floats).
pub fn derive_event_id(
    source: &str,
    event_type: &str,
    payload: &Payload,
    timestamp: &DateTime<Utc>,
) -> Result<EventId, IngestionError> {
    let bytes = canonical_bytes(source, event_type, payload, timestamp)?;
    Ok(EventId(hex::encode(Sha256::digest(&bytes))))
}

/// Canonical serialization hashed by [`derive_event_id`]
///
/// Compact JSON with fields in a fixed order, payload keys sorted, `-0.0`
/// folded into `0.0` and the timestamp rendered in UTC with nanoseconds.
pub fn canonical_bytes(
    source: &str,
    event_type: &str,
    payload: &Payload,
    timestamp: &DateTime<Utc>,
) -> Result<Vec<u8>, IngestionError> {
    let canonical = CanonicalEvent {
        event_type,
        payload: CanonicalPayload(payload),
        source,
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
    };

    serde_json::to_vec(&canonical).map_err(|e| IngestionError::serialization(e.to_string()))
}

// Field order here is the canonical order.
#[derive(Serialize)]
struct CanonicalEvent<'a> {
    event_type: &'a str,
    payload: CanonicalPayload<'a>,
    source: &'a str,
    timestamp: String,
}

struct CanonicalPayload<'a>(&'a Payload);

impl Serialize for CanonicalPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, CanonicalValue(v))))
    }
}

struct CanonicalValue<'a>(&'a PayloadValue);

impl Serialize for CanonicalValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            PayloadValue::Null => serializer.serialize_unit(),
            PayloadValue::Bool(b) => serializer.serialize_bool(*b),
            PayloadValue::Int(i) => serializer.serialize_i64(*i),
            PayloadValue::UInt(u) => serializer.serialize_u64(*u),
            PayloadValue::Float(f) if !f.is_finite() => Err(S::Error::custom(format!(
                "float value {} has no canonical form",
                f
            ))),
            PayloadValue::Float(f) => serializer.serialize_f64(if *f == 0.0 { 0.0 } else { *f }),
            PayloadValue::Text(s) => serializer.serialize_str(s),
            PayloadValue::List(items) => serializer.collect_seq(items.iter().map(CanonicalValue)),
            PayloadValue::Map(entries) => {
                serializer.collect_map(entries.iter().map(|(k, v)| (k, CanonicalValue(v))))
            }
        }
    }
}
