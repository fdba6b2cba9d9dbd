//! # Driftlog Domain Layer
//!
//! This crate contains the pure business logic and domain models for the Driftlog
//! event pipeline. It follows hexagonal architecture principles:
//!
//! - **Entities**: Core domain models (Event, StoredDocument)
//! - **Ports**: Trait definitions for external dependencies (EventPublisher, DocumentStore)
//! - **Services**: Business logic orchestration (IngestionService, StorageService)
//!
//! ## Architecture
//!
//! This layer has NO dependencies on infrastructure concerns (brokers, S3, HTTP, etc.).
//! All external dependencies are expressed as traits (ports) that are implemented
//! by adapter crates. Shared mutable state (rate limiter counters, open batches)
//! is owned by the service instances, so several pipelines can live in one process.
//!
//! ## Example
//!
//! ```rust
//! use driftlog_domain::event::RawEvent;
//! use driftlog_domain::ingestion::IngestionService;
//! use driftlog_domain::ports::EventPublisher;
//!
//! // The service is generic over any EventPublisher implementation
//! async fn example<P: EventPublisher>(service: IngestionService<P>) {
//!     let raw = RawEvent::new("svc1", "login", Default::default());
//!     let event_id = service.ingest_event(raw).await.unwrap();
//!     println!("Ingested event: {}", event_id);
//! }
//! ```

pub mod clock;
pub mod event;
pub mod ingestion;
pub mod ports;
pub mod retry;
pub mod storage;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
pub use event::{BatchId, Event, EventId, EventRules, Payload, PayloadValue, RawEvent};
pub use ingestion::{IngestionConfig, IngestionError, IngestionService};
pub use ports::{AdapterError, DocumentStore, EventPublisher, FailureClass, UpsertOutcome};
pub use retry::{run_with_retry, RetryError, RetryPolicy};
pub use storage::{
    BatchReport, StorageConfig, StorageError, StorageService, StoreAck, StoredDocument,
};
