//! Domain errors for storage operations

use thiserror::Error;

use crate::event::{BatchId, EventId};

/// Errors that can occur while buffering or writing events
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The collection name cannot be used
    #[error("Invalid collection name: {0:?}")]
    InvalidCollection(String),

    /// A batch could not be durably written
    ///
    /// `unconfirmed` lists exactly the events the store never confirmed, so
    /// re-ingestion can target them.
    #[error("Storage of batch {batch_id} in '{collection}' failed, {} events unconfirmed: {reason}", .unconfirmed.len())]
    StorageFailure {
        batch_id: BatchId,
        collection: String,
        unconfirmed: Vec<EventId>,
        reason: String,
    },
}

impl StorageError {
    /// Identifiers not durably confirmed, if any
    pub fn unconfirmed(&self) -> &[EventId] {
        match self {
            Self::StorageFailure { unconfirmed, .. } => unconfirmed,
            Self::InvalidCollection(_) => &[],
        }
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
