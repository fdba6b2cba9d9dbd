//! Domain errors for ingestion operations
//!
//! This module defines all possible errors that can occur during ingestion.
//! These are domain-level errors that abstract away infrastructure details.

use std::time::Duration;

use thiserror::Error;

use super::rate_limit::RateLimitExceeded;
use crate::event::EventId;
use crate::ports::AdapterError;

/// Errors that can occur during event ingestion
///
/// Every variant is scoped to one event. Variants raised after the identifier
/// was derived carry it, so the caller can re-submit exactly that event.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The raw event violates a field constraint
    #[error("Invalid event: {0}")]
    Validation(String),

    /// The payload has no canonical form and cannot be identified
    #[error("Cannot canonicalize event: {0}")]
    Serialization(String),

    /// No rate limiter permit became available in time
    #[error("Rate limit exceeded after waiting {}ms", .waited.as_millis())]
    RateLimitExceeded { waited: Duration },

    /// Publishing kept failing transiently until the retry budget ran out
    #[error("Publishing event {event_id} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        event_id: EventId,
        attempts: u32,
        #[source]
        last: AdapterError,
    },

    /// Publishing failed for a reason retrying cannot fix
    #[error("Ingestion of event {event_id} failed: {reason}")]
    IngestionFailure { event_id: EventId, reason: String },
}

impl IngestionError {
    /// Create a validation error with a message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with a message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an ingestion failure for an identified event
    pub fn ingestion_failure(event_id: EventId, reason: impl Into<String>) -> Self {
        Self::IngestionFailure {
            event_id,
            reason: reason.into(),
        }
    }

    /// Identifier of the affected event, when it was derived before the failure
    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            Self::RetryExhausted { event_id, .. } | Self::IngestionFailure { event_id, .. } => {
                Some(event_id)
            }
            _ => None,
        }
    }

    /// Whether the caller may reasonably submit the same event again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::RetryExhausted { .. }
        )
    }
}

impl From<RateLimitExceeded> for IngestionError {
    fn from(err: RateLimitExceeded) -> Self {
        Self::RateLimitExceeded { waited: err.waited }
    }
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestionError>;
