//! S3 Document Store Implementation
//!
//! This module implements the `DocumentStore` trait using AWS S3 as the backend.
//! It handles all S3 operations and converts AWS errors to classified adapter
//! errors the retry controller understands.

use std::collections::HashSet;
use std::future::Future;

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use driftlog_domain::{
    ports::{AdapterError, DocumentStore, FailureClass, UpsertOutcome},
    EventId, StoredDocument,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Error codes S3 returns for conditions that clear up on their own
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "RequestTimeout",
    "Throttling",
    "ThrottlingException",
];

/// Default number of `PutObject` requests in flight per bulk upsert
const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// S3-based implementation of the DocumentStore port
///
/// Each document becomes one JSON object keyed by its event identifier, so
/// an upsert is a plain overwrite.
///
/// ## Configuration
///
/// The store requires:
/// - An S3 bucket name
/// - A namespace used as the top-level key prefix (the "database")
/// - An AWS SDK S3 Client (configured with region, credentials, endpoint)
///
/// ## Error Handling
///
/// Throttling, server-side errors, timeouts and dispatch failures are
/// transient: the affected documents are reported in `UpsertOutcome::failed`.
/// Anything else (access denied, missing bucket) is permanent and aborts the
/// call.
#[derive(Clone)]
pub struct S3DocumentStore {
    client: Client,
    bucket: String,
    namespace: String,
    max_in_flight: usize,
}

impl S3DocumentStore {
    /// Create a new S3 document store
    ///
    /// # Arguments
    ///
    /// * `client` - Configured AWS S3 client
    /// * `bucket` - Name of the S3 bucket to use
    /// * `namespace` - Key prefix grouping every collection
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use aws_sdk_s3::Client;
    /// use driftlog_s3::infrastructure::S3DocumentStore;
    ///
    /// # async fn example() {
    /// let config = aws_config::load_from_env().await;
    /// let s3_client = Client::new(&config);
    /// let store = S3DocumentStore::new(s3_client, "driftlog".to_string(), "warehouse".to_string());
    /// # }
    /// ```
    pub fn new(client: Client, bucket: String, namespace: String) -> Self {
        info!(bucket = %bucket, namespace = %namespace, "Initializing S3DocumentStore");
        Self {
            client,
            bucket,
            namespace,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Set how many objects are written concurrently within one upsert
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the key prefix shared by every collection
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get the number of concurrent writes per upsert
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Generate the S3 key for a document
    fn object_key(namespace: &str, collection: &str, id: &EventId) -> String {
        format!("{}/{}/{}.json", namespace, collection, id)
    }
}

/// Classify an S3 error code
///
/// A service error without a code is treated as transient; those come from
/// proxies and gateways rather than from S3 itself.
fn classify_code(code: Option<&str>) -> FailureClass {
    match code {
        Some(code) if !TRANSIENT_CODES.contains(&code) => FailureClass::Permanent,
        _ => FailureClass::Transient,
    }
}

fn classify<E, R>(err: &SdkError<E, R>) -> FailureClass
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(service) => classify_code(service.err().code()),
        SdkError::ConstructionFailure(_) => FailureClass::Permanent,
        // Timeouts, dispatch failures and unreadable responses
        _ => FailureClass::Transient,
    }
}

/// Outcome of writing a single object
enum PutResult {
    Stored(EventId),
    Failed(EventId, AdapterError),
}

async fn put_document(
    client: Client,
    bucket: String,
    key: String,
    id: EventId,
    body: Bytes,
) -> PutResult {
    match client
        .put_object()
        .bucket(&bucket)
        .key(&key)
        .content_type("application/json")
        .body(ByteStream::from(body))
        .send()
        .await
    {
        Ok(_) => {
            debug!(key = %key, "Stored document");
            PutResult::Stored(id)
        }
        Err(err) => {
            let message = format!("S3 put_object failed for key '{}': {}", key, err);
            let adapter_error = match classify(&err) {
                FailureClass::Transient => AdapterError::transient(message),
                FailureClass::Permanent => AdapterError::permanent(message),
            };
            PutResult::Failed(id, adapter_error)
        }
    }
}

impl DocumentStore for S3DocumentStore {
    #[instrument(skip(self, documents), fields(collection = %collection, documents = documents.len()))]
    fn bulk_upsert(
        &self,
        collection: &str,
        documents: &[StoredDocument],
    ) -> impl Future<Output = Result<UpsertOutcome, AdapterError>> + Send {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let max_in_flight = self.max_in_flight;

        let encoded: Result<Vec<(String, EventId, Bytes)>, AdapterError> = documents
            .iter()
            .map(|doc| {
                let key = Self::object_key(&self.namespace, collection, &doc.id);
                serde_json::to_vec(doc)
                    .map(|body| (key, doc.id.clone(), Bytes::from(body)))
                    .map_err(|err| {
                        AdapterError::permanent(format!(
                            "cannot encode document {}: {}",
                            doc.id, err
                        ))
                    })
            })
            .collect();

        async move {
            let encoded = encoded?;
            let all_ids: Vec<EventId> = encoded.iter().map(|(_, id, _)| id.clone()).collect();
            let mut confirmed = Vec::with_capacity(encoded.len());
            let mut writes = JoinSet::new();

            for chunk in encoded.chunks(max_in_flight) {
                for (key, id, body) in chunk.iter().cloned() {
                    writes.spawn(put_document(client.clone(), bucket.clone(), key, id, body));
                }

                while let Some(joined) = writes.join_next().await {
                    match joined {
                        Ok(PutResult::Stored(id)) => confirmed.push(id),
                        Ok(PutResult::Failed(id, err)) if err.is_transient() => {
                            warn!(event_id = %id, error = %err, "Transient failure writing document");
                        }
                        Ok(PutResult::Failed(id, err)) => {
                            error!(event_id = %id, error = %err, "Permanent failure writing document");
                            writes.abort_all();
                            return Err(err);
                        }
                        Err(err) => {
                            warn!(error = %err, "Document write task did not complete");
                        }
                    }
                }
            }

            let stored: HashSet<&EventId> = confirmed.iter().collect();
            let failed: Vec<EventId> = all_ids
                .iter()
                .filter(|id| !stored.contains(id))
                .cloned()
                .collect();

            info!(
                bucket = %bucket,
                confirmed = confirmed.len(),
                failed = failed.len(),
                "Bulk upsert to S3 finished"
            );

            Ok(UpsertOutcome { confirmed, failed })
        }
    }
}
