//! Event bus abstraction shared by the publisher and the consumer.
//!
//! This service both produces and consumes its own topic. The two sides never
//! talk to each other directly: the only things they share are a topic name
//! and the [`Envelope`](crate::envelope::Envelope) schema. [`EventBus`] is the
//! seam that carries raw bytes between them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  Mutation (HTTP) │
//! └────────┬─────────┘
//!          │ publish(topic, key, body)
//!          ▼
//! ┌──────────────────┐
//! │    Event Bus     │◄─── Kafka-compatible broker
//! │  (partitioned)   │
//! └────────┬─────────┘
//!          │ subscribe(topic) → stream of deliveries
//!          ▼
//! ┌──────────────────┐
//! │ Consumer loop    │──► Dispatcher ──► Record Store
//! └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: a delivery may be seen more than once. A
//!   delivery counts as consumed only once the consumer calls
//!   [`Delivery::acknowledge`] after applying it; anything unacknowledged is
//!   delivered again to the next subscription.
//! - **Ordered within partition**: messages with the same key keep publish order
//! - **Opaque payloads**: the bus never looks inside the body
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`memory` feature) - for tests and local runs
//! - `RedpandaEventBus` (`todo-events-redpanda`) - for production (Kafka-compatible)

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to serialize an outbound message
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Topic name empty or otherwise invalid
    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl EventBusError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Broker-level failures are transient; a bad topic or an unserializable
    /// message will fail the same way every time.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::PublishFailed { .. } | Self::TransportError(_)
        )
    }
}

/// A message handed to the bus for publishing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Partition key. Messages with the same key keep their relative order.
    pub key: Option<String>,
    /// Message body
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Creates a keyed message.
    #[must_use]
    pub fn keyed(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: Some(key.into()),
            payload,
        }
    }
}

type AckFn = dyn Fn() -> Result<(), EventBusError> + Send + Sync;

/// Marks one delivery as consumed on the bus that produced it.
///
/// For Kafka this stores the next offset for commit; for the in-memory bus it
/// releases the message from the retained log. [`AckHandle::none`] does nothing.
#[derive(Clone, Default)]
pub struct AckHandle(Option<Arc<AckFn>>);

impl AckHandle {
    /// Handle that runs `ack` when the delivery is acknowledged.
    pub fn new<F>(ack: F) -> Self
    where
        F: Fn() -> Result<(), EventBusError> + Send + Sync + 'static,
    {
        Self(Some(Arc::new(ack)))
    }

    /// Handle for buses with nothing to acknowledge.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    fn ack(&self) -> Result<(), EventBusError> {
        self.0.as_ref().map_or(Ok(()), |ack| ack())
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AckHandle")
            .field(&if self.0.is_some() { "pending" } else { "none" })
            .finish()
    }
}

/// A message received from a subscription.
///
/// Transport coordinates are carried for logging only; application logic
/// never depends on them.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Topic the message was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message body (may be empty for tombstones)
    pub payload: Vec<u8>,
    /// Acknowledgement back to the bus
    pub ack: AckHandle,
}

impl Delivery {
    /// Mark this delivery, and everything before it on its partition, as consumed.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the acknowledgement could not be recorded. The
    /// message is then delivered again to a later subscription.
    pub fn acknowledge(&self) -> Result<(), EventBusError> {
        self.ack.ack()
    }
}

/// Stream of deliveries from a subscription.
///
/// Items from one partition arrive in publish order. An `Err` item reports a
/// receive failure for a single message; the stream itself continues.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Boxed future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: one bus instance is shared by every
/// in-flight HTTP request (publishing) and the consumer loop (subscribing).
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Verify that the broker is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if no broker answers.
    fn connect(&self) -> BusFuture<'_, ()>;

    /// Publish one message to a topic.
    ///
    /// Resolves once the broker has acknowledged the message (or the
    /// implementation's equivalent of that).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects or times out.
    fn publish<'a>(&'a self, topic: &'a str, message: &'a OutboundMessage) -> BusFuture<'a, ()>;

    /// Subscribe to a topic and receive a stream of deliveries.
    ///
    /// Dropping the returned stream releases the subscription.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe<'a>(&'a self, topic: &'a str) -> BusFuture<'a, EventStream>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn broker_failures_are_retryable() {
        assert!(
            EventBusError::PublishFailed {
                topic: "t".to_string(),
                reason: "timeout".to_string(),
            }
            .is_retryable()
        );
        assert!(EventBusError::ConnectionFailed("down".to_string()).is_retryable());
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(!EventBusError::InvalidTopic(String::new()).is_retryable());
        assert!(!EventBusError::SerializationFailed("bad".to_string()).is_retryable());
    }

    #[test]
    fn acknowledge_runs_the_handle() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let acks = Arc::new(AtomicUsize::new(0));
        let seen = acks.clone();
        let delivery = Delivery {
            topic: "todo-events".to_string(),
            partition: 0,
            offset: 7,
            payload: Vec::new(),
            ack: AckHandle::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        };

        delivery.acknowledge().unwrap();
        delivery.clone().acknowledge().unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 2);
        assert!(AckHandle::none().ack().is_ok());
    }

    #[test]
    fn publish_failed_display() {
        let err = EventBusError::PublishFailed {
            topic: "todo-events".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Publish failed for topic 'todo-events': broker down"
        );
    }
}
