//! Storage domain module
//!
//! This module contains the consumer-facing side of the pipeline: batching,
//! the stored document form and the service that writes batches durably.

mod batch;
mod document;
mod error;
mod service;

pub use batch::{BatchAccumulator, FlushReason};
pub use document::StoredDocument;
pub use error::{Result, StorageError};
pub use service::{BatchReport, FlushResults, StorageConfig, StorageService, StoreAck};
