//! Semi-structured event payloads
//!
//! Payloads are a closed set of value kinds. Anything a producer sends must map
//! onto one of these variants; there is no "any" escape hatch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level payload: string keys in sorted order
pub type Payload = BTreeMap<String, PayloadValue>;

/// A single payload value
///
/// Integers and non-integral numbers are kept apart (`Int(1)` is not
/// `Float(1.0)`), so the distinction survives into the event identifier.
/// Integers above `i64::MAX` land in `UInt` instead of losing precision
/// as a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<PayloadValue>),
    Map(BTreeMap<String, PayloadValue>),
}

impl PayloadValue {
    /// Nesting depth of this value (scalars are 0, an empty container is 1)
    pub fn depth(&self) -> usize {
        match self {
            PayloadValue::List(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            PayloadValue::Map(entries) => 1 + entries.values().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Nesting depth of a payload, counting the top-level map as 1
pub fn payload_depth(payload: &Payload) -> usize {
    1 + payload.values().map(PayloadValue::depth).max().unwrap_or(0)
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for PayloadValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(value) => Self::Int(value),
            Err(_) => Self::UInt(value),
        }
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
