//! In-process broker

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use driftlog_domain::ports::{AdapterError, EventPublisher};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument};

use crate::error::{ChannelError, Result};
use crate::topic::TopicFilter;

/// A message received by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was published to
    pub topic: String,
    pub payload: Bytes,
}

/// Receiving end of a subscription
///
/// Messages arrive in publish order for each topic. Dropping the subscription
/// unregisters it at the next publish.
#[derive(Debug)]
pub struct Subscription {
    filter: TopicFilter,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    /// Wait for the next message
    ///
    /// Returns `None` once the broker is closed and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take the next message if one is already buffered
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving; buffered messages can still be drained
    pub fn close(&mut self) {
        self.receiver.close();
    }

    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: TopicFilter,
    sender: mpsc::Sender<Delivery>,
}

#[derive(Debug)]
struct BrokerInner {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    closed: AtomicBool,
}

/// Topic broker living inside the process
///
/// Implements the channel port for single-process deployments. Every
/// subscription owns a bounded buffer of `capacity` messages; a publish is
/// delivered to all matching subscriptions or to none of them.
///
/// Cloning is cheap and every clone shares the same topics.
#[derive(Debug, Clone)]
pub struct InProcessBroker {
    inner: Arc<BrokerInner>,
}

impl InProcessBroker {
    /// Create a broker whose subscriptions buffer `capacity` messages each
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                capacity: capacity.max(1),
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to an explicit set of topics
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidFilter` if `topics` is empty
    /// - `ChannelError::Closed` if the broker was shut down
    pub async fn subscribe<I, T>(&self, topics: I) -> Result<Subscription>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let filter = TopicFilter::topics(topics);
        if filter.is_empty() {
            return Err(ChannelError::invalid_filter("no topics given"));
        }
        self.register(filter).await
    }

    /// Subscribe to every topic starting with `prefix`
    pub async fn subscribe_prefix(&self, prefix: impl Into<String>) -> Result<Subscription> {
        self.register(TopicFilter::prefix(prefix)).await
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        let subscribers = self.inner.subscribers.lock().await;
        subscribers.iter().filter(|s| !s.sender.is_closed()).count()
    }

    /// Shut the broker down
    ///
    /// Subscriptions drain what they already hold and then end; later
    /// publishes fail permanently.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let dropped = {
            let mut subscribers = self.inner.subscribers.lock().await;
            std::mem::take(&mut *subscribers).len()
        };
        info!(subscriptions = dropped, "Broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn register(&self, filter: TopicFilter) -> Result<Subscription> {
        let mut subscribers = self.inner.subscribers.lock().await;
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        subscribers.push(Subscriber {
            filter: filter.clone(),
            sender,
        });

        info!(filter = %filter, capacity = self.inner.capacity, "Subscription registered");
        Ok(Subscription { filter, receiver })
    }
}

impl BrokerInner {
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    async fn deliver(&self, topic: &str, payload: Bytes) -> std::result::Result<(), AdapterError> {
        if topic.is_empty() {
            return Err(AdapterError::permanent("topic name is empty"));
        }

        let mut subscribers = self.subscribers.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::permanent("broker is closed"));
        }

        let before = subscribers.len();
        subscribers.retain(|s| !s.sender.is_closed());
        if subscribers.len() < before {
            debug!(pruned = before - subscribers.len(), "Pruned closed subscriptions");
        }

        let targets: Vec<&Subscriber> = subscribers
            .iter()
            .filter(|s| s.filter.matches(topic))
            .collect();

        if targets.is_empty() {
            return Err(AdapterError::transient(format!(
                "no subscriber for topic '{}'",
                topic
            )));
        }

        // Checked before sending so a publish never reaches only part of its targets.
        // Receivers only free slots, so capacity cannot shrink while the lock is held.
        if let Some(full) = targets.iter().find(|s| s.sender.capacity() == 0) {
            return Err(AdapterError::transient(format!(
                "subscription buffer full for topic '{}' (filter {})",
                topic, full.filter
            )));
        }

        for subscriber in &targets {
            let delivery = Delivery {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.sender.try_send(delivery) {
                return Err(AdapterError::transient(format!(
                    "subscription buffer full for topic '{}'",
                    topic
                )));
            }
        }

        debug!(subscriptions = targets.len(), "Message delivered");
        Ok(())
    }
}

impl EventPublisher for InProcessBroker {
    fn publish(
        &self,
        topic: &str,
        message: Bytes,
    ) -> impl Future<Output = std::result::Result<(), AdapterError>> + Send {
        let inner = Arc::clone(&self.inner);
        let topic = topic.to_string();

        async move { inner.deliver(&topic, message).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_requires_topics() {
        let broker = InProcessBroker::new(4);

        let err = broker.subscribe(Vec::<String>::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised_to_one() {
        let broker = InProcessBroker::new(0);
        let mut sub = broker.subscribe(["t"]).await.unwrap();

        broker.publish("t", Bytes::from_static(b"1")).await.unwrap();
        let err = broker.publish("t", Bytes::from_static(b"2")).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(sub.try_recv().unwrap().payload, Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn test_empty_topic_is_permanent() {
        let broker = InProcessBroker::new(4);
        let _sub = broker.subscribe_prefix("").await.unwrap();

        let err = broker.publish("", Bytes::new()).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_subscriber_count_ignores_dropped() {
        let broker = InProcessBroker::new(4);
        let _kept = broker.subscribe(["a"]).await.unwrap();
        let dropped = broker.subscribe(["b"]).await.unwrap();
        drop(dropped);

        assert_eq!(broker.subscriber_count().await, 1);
    }
}
