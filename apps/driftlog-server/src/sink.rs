//! Sink worker - Channel to storage
//!
//! Consumes every topic under the configured prefix, decodes each message back
//! into an `Event` and hands it to the storage service under the collection
//! named by the topic suffix. A timer drives age-based flushes; on shutdown
//! the subscription is drained and every open batch is written.

use std::sync::Arc;
use std::time::Duration;

use driftlog_channel::{Delivery, Subscription};
use driftlog_domain::storage::FlushResults;
use driftlog_domain::{DocumentStore, Event, StorageService};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct Sink<S> {
    storage: Arc<StorageService<S>>,
    topic_prefix: String,
    flush_interval: Duration,
}

impl<S> Sink<S>
where
    S: DocumentStore,
{
    pub fn new(
        storage: Arc<StorageService<S>>,
        topic_prefix: String,
        flush_interval: Duration,
    ) -> Self {
        Self {
            storage,
            topic_prefix,
            flush_interval,
        }
    }

    /// Consume until shutdown is signalled or the channel closes
    pub async fn run(self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        info!(
            filter = %subscription.filter(),
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Sink worker started"
        );

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                delivery = subscription.recv() => match delivery {
                    Some(delivery) => self.handle(delivery).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    summarize(&self.storage.flush_expired().await);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        subscription.close();
        while let Some(delivery) = subscription.recv().await {
            self.handle(delivery).await;
        }

        let results = self.storage.flush_all().await;
        summarize(&results);
        info!(collections = results.len(), "Sink worker stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        let Some(collection) = collection_for(&self.topic_prefix, &delivery.topic) else {
            warn!(topic = %delivery.topic, "Skipping message outside the topic prefix");
            return;
        };

        let event: Event = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(topic = %delivery.topic, error = %err, "Skipping undecodable message");
                return;
            }
        };

        // Failures are logged by the storage service with the unconfirmed ids
        if let Err(err) = self.storage.store_event(collection, event).await {
            debug!(collection, error = %err, "Event not stored");
        }
    }
}

/// Collection for a topic: the topic name without the prefix
fn collection_for<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    topic.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

fn summarize(results: &FlushResults) {
    for (collection, outcome) in results {
        if let Ok(report) = outcome {
            debug!(
                collection = %collection,
                batch_id = %report.batch_id,
                confirmed = report.confirmed.len(),
                "Timed flush completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use driftlog_channel::InProcessBroker;
    use driftlog_domain::ports::{AdapterError, EventPublisher, UpsertOutcome};
    use driftlog_domain::{
        EventId, EventRules, Payload, PayloadValue, RawEvent, StorageConfig, StoredDocument,
    };
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MemoryStore {
        documents: Arc<Mutex<HashMap<(String, EventId), StoredDocument>>>,
    }

    impl MemoryStore {
        fn count(&self, collection: &str) -> usize {
            self.documents
                .lock()
                .unwrap()
                .keys()
                .filter(|(c, _)| c == collection)
                .count()
        }
    }

    impl DocumentStore for MemoryStore {
        fn bulk_upsert(
            &self,
            collection: &str,
            documents: &[StoredDocument],
        ) -> impl Future<Output = Result<UpsertOutcome, AdapterError>> + Send {
            let store = self.clone();
            let collection = collection.to_string();
            let documents = documents.to_vec();

            async move {
                let mut stored = store.documents.lock().unwrap();
                let mut outcome = UpsertOutcome::default();
                for doc in documents {
                    outcome.confirmed.push(doc.id.clone());
                    stored.insert((collection.clone(), doc.id.clone()), doc);
                }
                Ok(outcome)
            }
        }
    }

    fn encoded_event(event_type: &str, user: &str) -> Bytes {
        let mut payload = Payload::new();
        payload.insert("user".to_string(), PayloadValue::from(user));
        let raw = RawEvent::new("svc1", event_type, payload)
            .at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let event = Event::from_raw(raw, &EventRules::default(), Utc::now()).unwrap();
        Bytes::from(serde_json::to_vec(&event).unwrap())
    }

    #[test]
    fn test_collection_for_topic() {
        assert_eq!(collection_for("driftlog.", "driftlog.login"), Some("login"));
        assert_eq!(collection_for("driftlog.", "driftlog."), None);
        assert_eq!(collection_for("driftlog.", "other.login"), None);
    }

    #[tokio::test]
    async fn test_sink_stores_events_and_flushes_on_shutdown() {
        let broker = InProcessBroker::new(16);
        let subscription = broker.subscribe_prefix("driftlog.").await.unwrap();
        let store = MemoryStore::default();
        let storage = Arc::new(StorageService::new(store.clone(), StorageConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sink = Sink::new(
            Arc::clone(&storage),
            "driftlog.".to_string(),
            Duration::from_secs(60),
        );
        let worker = tokio::spawn(sink.run(subscription, shutdown_rx));

        broker.publish("driftlog.login", encoded_event("login", "alice")).await.unwrap();
        broker.publish("driftlog.login", encoded_event("login", "alice")).await.unwrap();
        broker.publish("driftlog.click", encoded_event("click", "bob")).await.unwrap();
        broker.publish("driftlog.login", Bytes::from_static(b"not json")).await.unwrap();

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();

        assert_eq!(store.count("login"), 1);
        assert_eq!(store.count("click"), 1);
        assert_eq!(storage.pending_events().await, 0);
    }

    #[tokio::test]
    async fn test_sink_stops_when_broker_closes() {
        let broker = InProcessBroker::new(16);
        let subscription = broker.subscribe_prefix("driftlog.").await.unwrap();
        let store = MemoryStore::default();
        let storage = Arc::new(StorageService::new(store.clone(), StorageConfig::default()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let sink = Sink::new(storage, "driftlog.".to_string(), Duration::from_secs(60));
        let worker = tokio::spawn(sink.run(subscription, shutdown_rx));

        broker.publish("driftlog.login", encoded_event("login", "carol")).await.unwrap();
        broker.close().await;
        worker.await.unwrap();

        assert_eq!(store.count("login"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_aged_batches() {
        let broker = InProcessBroker::new(16);
        let subscription = broker.subscribe_prefix("driftlog.").await.unwrap();
        let store = MemoryStore::default();
        let config = StorageConfig {
            max_batch_age: Duration::from_millis(500),
            ..Default::default()
        };
        let storage = Arc::new(StorageService::new(store.clone(), config));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let sink = Sink::new(
            Arc::clone(&storage),
            "driftlog.".to_string(),
            Duration::from_millis(100),
        );
        tokio::spawn(sink.run(subscription, shutdown_rx));

        broker.publish("driftlog.login", encoded_event("login", "dave")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.pending_events().await, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(store.count("login"), 1);
        assert_eq!(storage.pending_events().await, 0);
    }
}
