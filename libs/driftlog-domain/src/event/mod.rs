//! Event domain module
//!
//! This module defines what an Event is, how its payload is structured and how
//! its identifier is derived from its content.

mod entity;
mod ids;
mod payload;

pub use entity::{Event, EventRules, RawEvent};
pub use ids::{canonical_bytes, derive_event_id, BatchId, EventId};
pub use payload::{payload_depth, Payload, PayloadValue};
