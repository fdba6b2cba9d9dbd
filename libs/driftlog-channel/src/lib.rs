//! # Driftlog Channel
//!
//! In-process topic broker implementing the domain's `EventPublisher` port.
//!
//! Producers publish encoded events to `{prefix}{event_type}` topics; the
//! consuming side subscribes to explicit topics or to a whole prefix and
//! receives [`Delivery`] values in publish order.
//!
//! ## Back-pressure
//!
//! Each subscription buffers a bounded number of messages. When a matching
//! buffer is full, or no live subscription matches the topic, `publish` fails
//! with a transient `AdapterError`, which the ingestion retry policy backs off on.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use driftlog_channel::InProcessBroker;
//! use driftlog_domain::ports::EventPublisher;
//!
//! # async fn example() -> driftlog_channel::Result<()> {
//! let broker = InProcessBroker::new(1024);
//! let mut subscription = broker.subscribe_prefix("driftlog.").await?;
//!
//! broker
//!     .publish("driftlog.login", Bytes::from_static(b"{}"))
//!     .await
//!     .ok();
//!
//! if let Some(delivery) = subscription.recv().await {
//!     println!("{} -> {} bytes", delivery.topic, delivery.payload.len());
//! }
//! # Ok(())
//! # }
//! ```

mod broker;
mod error;
mod topic;

pub use broker::{Delivery, InProcessBroker, Subscription};
pub use error::{ChannelError, Result};
pub use topic::TopicFilter;
