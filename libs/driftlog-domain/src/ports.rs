//! Ports (trait definitions) for external dependencies
//!
//! This module defines the contracts (ports) that external adapters must implement.
//! Following hexagonal architecture, the domain defines what it needs, and the
//! infrastructure provides implementations.
//!
//! ## Static Dispatch
//!
//! We use native Rust async traits with `impl Future` return types instead of
//! `async_trait` to ensure zero-cost abstractions and static dispatch.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use thiserror::Error;

use crate::event::EventId;
use crate::storage::StoredDocument;

/// Whether retrying an operation can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, unavailability, back-pressure: worth another attempt
    Transient,
    /// Malformed data, authorization, missing resources: retrying cannot fix it
    Permanent,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Transient => f.write_str("transient"),
            FailureClass::Permanent => f.write_str("permanent"),
        }
    }
}

/// Error reported by an adapter behind a port
///
/// Adapters translate their infrastructure errors into this type and decide the
/// failure class at that point, so retry decisions never inspect adapter
/// internals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{class} failure: {message}")]
pub struct AdapterError {
    class: FailureClass,
    message: String,
}

impl AdapterError {
    /// Create a transient error with a message
    pub fn transient(msg: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: msg.into(),
        }
    }

    /// Create a permanent error with a message
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: msg.into(),
        }
    }

    /// Get the failure class
    pub fn class(&self) -> FailureClass {
        self.class
    }

    /// Get the message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check whether the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

/// Port for the message channel
///
/// Implementations hand a message to a broker topic. Topic creation and
/// partitioning are the broker's business.
pub trait EventPublisher: Send + Sync {
    /// Publish one message to a topic
    ///
    /// # Arguments
    ///
    /// * `topic` - Full topic name (prefix included)
    /// * `message` - Encoded event
    ///
    /// # Errors
    ///
    /// Returns an `AdapterError` classified as transient or permanent
    fn publish(
        &self,
        topic: &str,
        message: Bytes,
    ) -> impl Future<Output = Result<(), AdapterError>> + Send;
}

/// Result of a bulk upsert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Documents the store confirmed as durably written
    pub confirmed: Vec<EventId>,
    /// Documents the store could not write this time
    pub failed: Vec<EventId>,
}

/// Port for the persistent document store
///
/// This trait abstracts away the storage backend (S3, document database, etc.).
/// Implementations must handle:
/// - Writing each document under its `event_id` as the primary key
/// - Overwriting existing documents with the same key (upsert, never a
///   duplicate-key failure)
/// - Converting infrastructure errors to classified `AdapterError`s
pub trait DocumentStore: Send + Sync {
    /// Upsert a set of documents into a collection
    ///
    /// # Arguments
    ///
    /// * `collection` - Target collection name
    /// * `documents` - Documents keyed by their `id`
    ///
    /// # Returns
    ///
    /// The identifiers confirmed and the identifiers that failed individually
    ///
    /// # Errors
    ///
    /// Returns an `AdapterError` when the whole call failed
    fn bulk_upsert(
        &self,
        collection: &str,
        documents: &[StoredDocument],
    ) -> impl Future<Output = Result<UpsertOutcome, AdapterError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_class() {
        let err = AdapterError::transient("broker unavailable");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "transient failure: broker unavailable");

        let err = AdapterError::permanent("access denied");
        assert!(!err.is_transient());
        assert_eq!(err.class(), FailureClass::Permanent);
        assert_eq!(err.message(), "access denied");
    }
}
