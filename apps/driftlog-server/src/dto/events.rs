//! DTOs for event endpoints

use chrono::{DateTime, Utc};
use driftlog_domain::{BatchReport, Payload, RawEvent, StorageError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for the ingestion endpoint
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestRequest {
    /// Producer of the event
    #[schema(example = "svc1")]
    pub source: String,
    /// Event kind, also names the topic and the collection
    #[schema(example = "login")]
    pub event_type: String,
    /// Arbitrary JSON object
    #[serde(default)]
    #[schema(value_type = Object, example = json!({"user": "alice"}))]
    pub payload: Payload,
    /// Occurrence time; defaults to the time of ingestion
    #[serde(default)]
    #[schema(example = "2024-01-01T00:00:00Z")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<IngestRequest> for RawEvent {
    fn from(request: IngestRequest) -> Self {
        RawEvent {
            source: request.source,
            event_type: request.event_type,
            payload: request.payload,
            timestamp: request.timestamp,
        }
    }
}

/// Response body for successful ingestion
#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    /// Content-derived identifier of the event
    #[schema(example = "2f7ce069b1e39f40f4491cffba72127ad3d2cfba8b95fc50cdc8b62fbc102db6")]
    pub event_id: String,
    #[schema(example = "Event accepted")]
    pub message: String,
}

/// Outcome of flushing one collection
#[derive(Debug, Serialize, ToSchema)]
pub struct CollectionFlush {
    #[schema(example = "login")]
    pub collection: String,
    /// Batch identifier, absent when the collection name was rejected
    pub batch_id: Option<String>,
    /// Number of documents confirmed by the store (0 when the write failed)
    pub confirmed: usize,
    /// Identifiers the store never confirmed
    pub unconfirmed: Vec<String>,
    /// Write attempts, on success
    pub attempts: Option<u32>,
    pub error: Option<String>,
}

impl CollectionFlush {
    pub fn new(collection: String, outcome: &Result<BatchReport, StorageError>) -> Self {
        match outcome {
            Ok(report) => Self {
                collection,
                batch_id: Some(report.batch_id.to_string()),
                confirmed: report.confirmed.len(),
                unconfirmed: Vec::new(),
                attempts: Some(report.attempts),
                error: None,
            },
            Err(err) => Self {
                collection,
                batch_id: match err {
                    StorageError::StorageFailure { batch_id, .. } => Some(batch_id.to_string()),
                    StorageError::InvalidCollection(_) => None,
                },
                confirmed: 0,
                unconfirmed: err.unconfirmed().iter().map(ToString::to_string).collect(),
                attempts: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Response body for the flush endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct FlushResponse {
    pub collections: Vec<CollectionFlush>,
}

/// Error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error description
    #[schema(example = "Invalid event: source must not be empty")]
    pub error: String,
    /// Identifier of the affected event, when known
    pub event_id: Option<String>,
}
