//! Storage service - Batching and durable writes
//!
//! Events are buffered per collection and written to the document store in
//! bulk. Each write is retried on transient failures; whatever the store never
//! confirmed is reported back by identifier instead of being dropped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use super::batch::{BatchAccumulator, FlushReason};
use super::document::StoredDocument;
use super::StorageError;
use crate::clock::{Clock, SystemClock};
use crate::event::{BatchId, Event, EventId};
use crate::ports::{AdapterError, DocumentStore};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};

/// Configuration for the storage service
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Events per batch before a write is triggered (default: 1000)
    pub max_batch_size: usize,
    /// Age of the oldest buffered event before a write is due (default: 5s)
    pub max_batch_age: Duration,
    /// Retry policy for bulk writes
    pub retry: RetryPolicy,
    /// Bound on a single bulk write attempt (default: 30s)
    pub write_timeout: Duration,
    /// Bulk writes allowed in flight at once (default: 4)
    pub max_concurrent_writes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            max_batch_age: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            write_timeout: Duration::from_secs(30),
            max_concurrent_writes: 4,
        }
    }
}

/// Outcome of one successful batch write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub collection: String,
    /// Distinct identifiers confirmed by the store
    pub confirmed: Vec<EventId>,
    /// Write attempts it took
    pub attempts: u32,
}

/// Acknowledgment for [`StorageService::store_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAck {
    /// Accepted and buffered; `pending` events wait in this collection's batch
    Buffered { pending: usize },
    /// The event closed a batch, which was written before returning
    Flushed(BatchReport),
}

/// Per-collection flush results
pub type FlushResults = BTreeMap<String, Result<BatchReport, StorageError>>;

/// Service persisting events to a document store in batches
///
/// ## Static Dispatch
///
/// The service is generic over any `DocumentStore` implementation.
pub struct StorageService<S> {
    store: S,
    config: StorageConfig,
    batches: Mutex<HashMap<String, BatchAccumulator>>,
    write_slots: Semaphore,
    clock: Arc<dyn Clock>,
}

impl<S> StorageService<S>
where
    S: DocumentStore,
{
    /// Create a new StorageService with the given store and configuration
    pub fn new(store: S, config: StorageConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a new StorageService stamping documents with the given clock
    pub fn with_clock(store: S, config: StorageConfig, clock: Arc<dyn Clock>) -> Self {
        let write_slots = Semaphore::new(config.max_concurrent_writes.max(1));
        Self {
            store,
            config,
            batches: Mutex::new(HashMap::new()),
            write_slots,
            clock,
        }
    }

    /// Buffer an event for a collection, writing the batch if it is now full
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidCollection` if `collection` is blank
    /// - `StorageError::StorageFailure` if this event closed a batch and the
    ///   write failed; the error lists every unconfirmed identifier
    #[instrument(skip(self, event), fields(event_id = %event.id()))]
    pub async fn store_event(
        &self,
        collection: &str,
        event: Event,
    ) -> Result<StoreAck, StorageError> {
        if collection.trim().is_empty() {
            warn!("Rejected event for blank collection");
            return Err(StorageError::InvalidCollection(collection.to_string()));
        }

        let (reason, events) = {
            let mut batches = self.batches.lock().await;
            let batch = batches.entry(collection.to_string()).or_insert_with(|| {
                BatchAccumulator::new(self.config.max_batch_size, self.config.max_batch_age)
            });

            match batch.add(event) {
                Some(reason) => (reason, batch.flush()),
                None => {
                    return Ok(StoreAck::Buffered {
                        pending: batch.len(),
                    })
                }
            }
        };

        debug!(collection, ?reason, size = events.len(), "Batch closed");
        self.write_batch(collection, events).await.map(StoreAck::Flushed)
    }

    /// Write every open batch now
    ///
    /// Used at shutdown or by an external scheduler. Collections with nothing
    /// buffered are not included in the results.
    pub async fn flush_all(&self) -> FlushResults {
        let drained = {
            let mut batches = self.batches.lock().await;
            batches
                .iter_mut()
                .filter(|(_, batch)| !batch.is_empty())
                .map(|(collection, batch)| (collection.clone(), batch.flush()))
                .collect::<Vec<_>>()
        };

        self.write_all(drained, None).await
    }

    /// Write the batches whose oldest event has waited `max_batch_age`
    pub async fn flush_expired(&self) -> FlushResults {
        let now = tokio::time::Instant::now();
        let drained = {
            let mut batches = self.batches.lock().await;
            batches
                .iter_mut()
                .filter(|(_, batch)| batch.is_due(now))
                .map(|(collection, batch)| (collection.clone(), batch.flush()))
                .collect::<Vec<_>>()
        };

        self.write_all(drained, Some(FlushReason::Age)).await
    }

    /// Number of buffered events across all collections
    pub async fn pending_events(&self) -> usize {
        self.batches.lock().await.values().map(BatchAccumulator::len).sum()
    }

    /// Get the service configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    async fn write_all(
        &self,
        drained: Vec<(String, Vec<Event>)>,
        reason: Option<FlushReason>,
    ) -> FlushResults {
        let mut results = BTreeMap::new();
        for (collection, events) in drained {
            debug!(collection = %collection, ?reason, size = events.len(), "Flushing batch");
            let outcome = self.write_batch(&collection, events).await;
            results.insert(collection, outcome);
        }
        results
    }

    /// Upsert one flushed batch, retrying whatever the store did not confirm
    #[instrument(skip(self, events), fields(batch_size = events.len()))]
    async fn write_batch(
        &self,
        collection: &str,
        events: Vec<Event>,
    ) -> Result<BatchReport, StorageError> {
        let batch_id = BatchId::new();
        let stored_at = self.clock.now();

        let mut seen = HashSet::new();
        let documents: Vec<StoredDocument> = events
            .iter()
            .filter(|event| seen.insert(event.id().clone()))
            .map(|event| StoredDocument::from_event(event, stored_at))
            .collect();

        let pending = Mutex::new(documents);
        let confirmed = Mutex::new(Vec::new());

        let failure = |unconfirmed: Vec<EventId>, reason: String| StorageError::StorageFailure {
            batch_id,
            collection: collection.to_string(),
            unconfirmed,
            reason,
        };

        let _slot = match self.write_slots.acquire().await {
            Ok(slot) => slot,
            Err(_) => {
                let unconfirmed = pending.into_inner().into_iter().map(|d| d.id).collect();
                return Err(failure(unconfirmed, "write slots closed".to_string()));
            }
        };

        let store = &self.store;
        let write_timeout = self.config.write_timeout;
        let (pending_ref, confirmed_ref) = (&pending, &confirmed);

        let outcome = run_with_retry(&self.config.retry, |attempt| async move {
            let documents = pending_ref.lock().await.clone();

            let written =
                match tokio::time::timeout(write_timeout, store.bulk_upsert(collection, &documents))
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(AdapterError::transient(format!(
                            "bulk upsert attempt {} timed out after {}ms",
                            attempt,
                            write_timeout.as_millis()
                        )))
                    }
                };

            let accepted: HashSet<&EventId> = written.confirmed.iter().collect();
            let mut pending = pending_ref.lock().await;
            pending.retain(|document| !accepted.contains(&document.id));
            confirmed_ref
                .lock()
                .await
                .extend(written.confirmed.iter().cloned());

            if pending.is_empty() {
                Ok(())
            } else {
                Err(AdapterError::transient(format!(
                    "{} of {} documents unconfirmed",
                    pending.len(),
                    documents.len()
                )))
            }
        })
        .await;

        let unconfirmed: Vec<EventId> = pending.into_inner().into_iter().map(|d| d.id).collect();
        let mut confirmed = confirmed.into_inner();
        let mut distinct = HashSet::new();
        confirmed.retain(|id| distinct.insert(id.clone()));

        match outcome {
            Ok(done) => {
                info!(
                    batch_id = %batch_id,
                    collection,
                    confirmed = confirmed.len(),
                    attempts = done.attempts,
                    "Batch stored successfully"
                );
                Ok(BatchReport {
                    batch_id,
                    collection: collection.to_string(),
                    confirmed,
                    attempts: done.attempts,
                })
            }
            Err(err) => {
                let attempts = err.attempts();
                let reason = match err {
                    RetryError::Exhausted { last, .. } => {
                        format!("retries exhausted after {} attempts: {}", attempts, last)
                    }
                    RetryError::Permanent { error, .. } => error.to_string(),
                };
                error!(
                    batch_id = %batch_id,
                    collection,
                    confirmed = confirmed.len(),
                    unconfirmed = unconfirmed.len(),
                    unconfirmed_ids = ?unconfirmed,
                    attempts,
                    error = %reason,
                    "Batch storage failed"
                );
                Err(failure(unconfirmed, reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::event::{EventRules, Payload, PayloadValue, RawEvent};
    use crate::ports::UpsertOutcome;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted behaviour for one bulk_upsert call
    #[derive(Clone)]
    enum Step {
        Fail(AdapterError),
        /// Confirm all but this many documents (the last ones of the call)
        Partial(usize),
    }

    // In-memory upsert store keyed by collection and event id
    #[derive(Clone, Default)]
    struct InMemoryStore {
        documents: Arc<StdMutex<HashMap<(String, EventId), StoredDocument>>>,
        calls: Arc<StdMutex<Vec<usize>>>,
        script: Arc<StdMutex<VecDeque<Step>>>,
    }

    impl InMemoryStore {
        fn scripted(steps: Vec<Step>) -> Self {
            let store = Self::default();
            *store.script.lock().unwrap() = steps.into();
            store
        }

        fn count(&self, collection: &str) -> usize {
            self.documents
                .lock()
                .unwrap()
                .keys()
                .filter(|(c, _)| c == collection)
                .count()
        }

        fn get(&self, collection: &str, id: &EventId) -> Option<StoredDocument> {
            self.documents
                .lock()
                .unwrap()
                .get(&(collection.to_string(), id.clone()))
                .cloned()
        }

        fn call_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DocumentStore for InMemoryStore {
        fn bulk_upsert(
            &self,
            collection: &str,
            documents: &[StoredDocument],
        ) -> impl std::future::Future<Output = Result<UpsertOutcome, AdapterError>> + Send {
            let collection = collection.to_string();
            let documents = documents.to_vec();
            let store = self.clone();

            async move {
                store.calls.lock().unwrap().push(documents.len());
                let step = store.script.lock().unwrap().pop_front();

                let skip = match step {
                    Some(Step::Fail(err)) => return Err(err),
                    Some(Step::Partial(skip)) => skip,
                    None => 0,
                };

                let keep = documents.len().saturating_sub(skip);
                let mut outcome = UpsertOutcome::default();
                let mut stored = store.documents.lock().unwrap();
                for (i, document) in documents.into_iter().enumerate() {
                    if i < keep {
                        outcome.confirmed.push(document.id.clone());
                        stored.insert((collection.clone(), document.id.clone()), document);
                    } else {
                        outcome.failed.push(document.id);
                    }
                }
                Ok(outcome)
            }
        }
    }

    fn event(i: i64) -> Event {
        let mut payload = Payload::new();
        payload.insert("seq".to_string(), PayloadValue::Int(i));
        let raw = RawEvent::new("svc1", "tick", payload)
            .at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Event::from_raw(raw, &EventRules::default(), Utc::now()).unwrap()
    }

    fn config(max_batch_size: usize) -> StorageConfig {
        StorageConfig {
            max_batch_size,
            max_batch_age: Duration::from_millis(500),
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(10),
                ..Default::default()
            },
            write_timeout: Duration::from_millis(200),
            max_concurrent_writes: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_event_buffers_until_full() {
        let store = InMemoryStore::default();
        let service = StorageService::new(store.clone(), config(3));

        assert_eq!(
            service.store_event("tick", event(0)).await.unwrap(),
            StoreAck::Buffered { pending: 1 }
        );
        assert_eq!(
            service.store_event("tick", event(1)).await.unwrap(),
            StoreAck::Buffered { pending: 2 }
        );
        assert!(store.call_sizes().is_empty());

        let ack = service.store_event("tick", event(2)).await.unwrap();
        let StoreAck::Flushed(report) = ack else {
            panic!("third event should close the batch");
        };
        assert_eq!(report.confirmed.len(), 3);
        assert_eq!(report.attempts, 1);
        assert_eq!(store.count("tick"), 3);
        assert_eq!(service.pending_events().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_collection_rejected() {
        let service = StorageService::new(InMemoryStore::default(), config(3));

        let err = service.store_event("  ", event(0)).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidCollection(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collections_are_batched_independently() {
        let store = InMemoryStore::default();
        let service = StorageService::new(store.clone(), config(2));

        service.store_event("a", event(0)).await.unwrap();
        service.store_event("b", event(1)).await.unwrap();
        assert!(store.call_sizes().is_empty());

        let ack = service.store_event("a", event(2)).await.unwrap();
        assert!(matches!(ack, StoreAck::Flushed(_)));
        assert_eq!(store.count("a"), 2);
        assert_eq!(store.count("b"), 0);
        assert_eq!(service.pending_events().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_writes_every_open_batch() {
        let store = InMemoryStore::default();
        let service = StorageService::new(store.clone(), config(10));

        service.store_event("a", event(0)).await.unwrap();
        service.store_event("a", event(1)).await.unwrap();
        service.store_event("b", event(2)).await.unwrap();

        let results = service.flush_all().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["a"].as_ref().unwrap().confirmed.len(), 2);
        assert_eq!(results["b"].as_ref().unwrap().confirmed.len(), 1);
        assert_eq!(service.pending_events().await, 0);

        assert!(service.flush_all().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_expired_only_writes_aged_batches() {
        let store = InMemoryStore::default();
        let service = StorageService::new(store.clone(), config(10));

        service.store_event("old", event(0)).await.unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        service.store_event("new", event(1)).await.unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;

        let results = service.flush_expired().await;

        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["old"]);
        assert_eq!(store.count("old"), 1);
        assert_eq!(service.pending_events().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let store = InMemoryStore::scripted(vec![
            Step::Fail(AdapterError::transient("connection reset")),
            Step::Fail(AdapterError::transient("connection reset")),
        ]);
        let service = StorageService::new(store.clone(), config(2));

        service.store_event("tick", event(0)).await.unwrap();
        let ack = service.store_event("tick", event(1)).await.unwrap();

        let StoreAck::Flushed(report) = ack else {
            panic!("batch should have been written");
        };
        assert_eq!(report.attempts, 3);
        assert_eq!(report.confirmed.len(), 2);
        assert_eq!(store.count("tick"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_retries_only_unconfirmed() {
        let store = InMemoryStore::scripted(vec![Step::Partial(1)]);
        let service = StorageService::new(store.clone(), config(3));

        for i in 0..3 {
            service.store_event("tick", event(i)).await.unwrap();
        }

        assert_eq!(store.call_sizes(), vec![3, 1]);
        assert_eq!(store.count("tick"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_unconfirmed_ids() {
        let store = InMemoryStore::scripted(vec![
            Step::Partial(2),
            Step::Fail(AdapterError::transient("timeout")),
            Step::Fail(AdapterError::transient("timeout")),
        ]);
        let service = StorageService::new(store.clone(), config(3));

        let events: Vec<Event> = (0..3).map(event).collect();
        let expected_unconfirmed: Vec<EventId> =
            events[1..].iter().map(|e| e.id().clone()).collect();

        service.store_event("tick", events[0].clone()).await.unwrap();
        service.store_event("tick", events[1].clone()).await.unwrap();
        let err = service
            .store_event("tick", events[2].clone())
            .await
            .unwrap_err();

        assert_eq!(err.unconfirmed(), expected_unconfirmed.as_slice());
        assert!(err.to_string().contains("retries exhausted after 3 attempts"));
        assert_eq!(store.count("tick"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let store = InMemoryStore::scripted(vec![Step::Fail(AdapterError::permanent(
            "access denied",
        ))]);
        let service = StorageService::new(store.clone(), config(1));

        let err = service.store_event("tick", event(0)).await.unwrap_err();

        assert_eq!(err.unconfirmed().len(), 1);
        assert_eq!(store.call_sizes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_within_batch_collapse() {
        let store = InMemoryStore::default();
        let service = StorageService::new(store.clone(), config(3));

        service.store_event("tick", event(7)).await.unwrap();
        service.store_event("tick", event(7)).await.unwrap();
        let ack = service.store_event("tick", event(8)).await.unwrap();

        let StoreAck::Flushed(report) = ack else {
            panic!("batch should have been written");
        };
        assert_eq!(report.confirmed.len(), 2);
        assert_eq!(store.call_sizes(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_across_batches_is_an_upsert() {
        let first_write: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let second_write: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        let mut clock = MockClock::new();
        let mut seq = mockall::Sequence::new();
        clock
            .expect_now()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(first_write);
        clock
            .expect_now()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(second_write);

        let store = InMemoryStore::default();
        let service = StorageService::with_clock(store.clone(), config(1), Arc::new(clock));

        let e = event(42);
        service.store_event("tick", e.clone()).await.unwrap();
        service.store_event("tick", e.clone()).await.unwrap();

        assert_eq!(store.call_sizes(), vec![1, 1]);
        assert_eq!(store.count("tick"), 1);
        let stored = store.get("tick", e.id()).unwrap();
        assert_eq!(stored.stored_at, second_write);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out_and_reports() {
        // Store that never answers
        struct StalledStore;

        impl DocumentStore for StalledStore {
            fn bulk_upsert(
                &self,
                _collection: &str,
                _documents: &[StoredDocument],
            ) -> impl std::future::Future<Output = Result<UpsertOutcome, AdapterError>> + Send
            {
                std::future::pending()
            }
        }

        let service = StorageService::new(StalledStore, config(1));

        let err = service.store_event("tick", event(0)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(err.unconfirmed().len(), 1);
    }
}
