//! Ingestion service - Business logic orchestration
//!
//! This module contains the core business logic for event ingestion.
//! The service validates events, derives their identifiers, applies admission
//! control and hands them to the channel port.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};

use super::rate_limit::{RateLimitConfig, RateLimiter};
use super::IngestionError;
use crate::clock::{Clock, SystemClock};
use crate::event::{Event, EventId, EventRules, RawEvent};
use crate::ports::{AdapterError, EventPublisher};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};

/// Configuration for the ingestion service
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Prepended to the event type to form the topic name (default: "driftlog.")
    pub topic_prefix: String,
    /// Field constraints for incoming events
    pub rules: EventRules,
    /// Admission control
    pub rate_limit: RateLimitConfig,
    /// Retry policy for publishing
    pub retry: RetryPolicy,
    /// Bound on a single publish attempt (default: 5s)
    pub publish_timeout: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "driftlog.".to_string(),
            rules: EventRules::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Service for ingesting events into the Driftlog pipeline
///
/// This service encapsulates the business rules for ingestion:
/// - Validates events and derives their content identifiers
/// - Bounds throughput through its own rate limiter
/// - Publishes to the channel via the publisher port, retrying transient failures
///
/// A successful return means the event was handed to the channel, not that it
/// has been stored.
///
/// ## Static Dispatch
///
/// The service is generic over any `EventPublisher` implementation.
pub struct IngestionService<P> {
    publisher: P,
    config: IngestionConfig,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl<P> IngestionService<P>
where
    P: EventPublisher,
{
    /// Create a new IngestionService with the given publisher and configuration
    pub fn new(publisher: P, config: IngestionConfig) -> Self {
        Self::with_clock(publisher, config, Arc::new(SystemClock))
    }

    /// Create a new IngestionService reading time from the given clock
    pub fn with_clock(publisher: P, config: IngestionConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            publisher,
            config,
            limiter,
            clock,
        }
    }

    /// Ingest an event and return its identifier
    ///
    /// This is the main entry point for ingestion. It:
    /// 1. Validates the event and derives its identifier
    /// 2. Waits for a rate limiter permit
    /// 3. Publishes the encoded event to `{topic_prefix}{event_type}`, retrying
    ///    transient failures
    /// 4. Releases the permit, whatever the outcome
    ///
    /// # Errors
    ///
    /// - `IngestionError::Validation` if the event is malformed
    /// - `IngestionError::Serialization` if the payload cannot be canonicalized
    /// - `IngestionError::RateLimitExceeded` if no permit was granted in time
    /// - `IngestionError::RetryExhausted` if publishing kept failing transiently
    /// - `IngestionError::IngestionFailure` if publishing failed permanently
    #[instrument(skip(self, raw), fields(source = %raw.source, event_type = %raw.event_type))]
    pub async fn ingest_event(&self, raw: RawEvent) -> Result<EventId, IngestionError> {
        let event = match Event::from_raw(raw, &self.config.rules, self.clock.now()) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "Rejected event");
                return Err(err);
            }
        };

        let event_id = event.id().clone();
        let topic = self.topic_for(event.event_type());
        let message = encode(&event)?;

        let _permit = match self.limiter.admit().await {
            Ok(permit) => permit,
            Err(err) => {
                warn!(event_id = %event_id, waited_ms = err.waited.as_millis() as u64, "Rate limit exceeded");
                return Err(err.into());
            }
        };

        debug!(event_id = %event_id, topic = %topic, "Publishing event");

        let publisher = &self.publisher;
        let topic_ref = topic.as_str();
        let publish_timeout = self.config.publish_timeout;

        let outcome = run_with_retry(&self.config.retry, |attempt| {
            let message = message.clone();
            async move {
                match tokio::time::timeout(publish_timeout, publisher.publish(topic_ref, message))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::transient(format!(
                        "publish attempt {} timed out after {}ms",
                        attempt,
                        publish_timeout.as_millis()
                    ))),
                }
            }
        })
        .await;

        match outcome {
            Ok(done) => {
                info!(event_id = %event_id, topic = %topic, attempts = done.attempts, "Event ingested successfully");
                Ok(event_id)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(event_id = %event_id, topic = %topic, attempts, error = %last, "Retries exhausted while publishing event");
                Err(IngestionError::RetryExhausted {
                    event_id,
                    attempts,
                    last,
                })
            }
            Err(RetryError::Permanent { error, .. }) => {
                error!(event_id = %event_id, topic = %topic, error = %error, "Publishing event failed permanently");
                Err(IngestionError::ingestion_failure(event_id, error.to_string()))
            }
        }
    }

    /// Topic an event type is published to
    pub fn topic_for(&self, event_type: &str) -> String {
        format!("{}{}", self.config.topic_prefix, event_type)
    }

    /// Get the service configuration
    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Get the rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

fn encode(event: &Event) -> Result<Bytes, IngestionError> {
    serde_json::to_vec(event)
        .map(Bytes::from)
        .map_err(|e| IngestionError::serialization(e.to_string()))
}
