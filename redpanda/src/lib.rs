//! Kafka/Redpanda event bus for the todo service.
//!
//! Implements [`EventBus`] from `todo-events-core` on top of rdkafka, so the
//! same binary runs against Redpanda, Apache Kafka or any other
//! Kafka-compatible broker.
//!
//! # Wire format
//!
//! Messages carry the envelope's JSON bytes as the payload, untouched, and
//! the record id as the key. The key routes every event of one record to the
//! same partition, which is what keeps create → update → delete in order.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with offsets stored on acknowledgement:
//! - `enable.auto.offset.store` is off: a message's offset is stored only when
//!   the subscriber calls [`Delivery::acknowledge`], i.e. after it was applied
//! - stored offsets are committed by the auto-commit timer and once more when
//!   the consumer closes
//! - messages still buffered when the subscription is dropped are never
//!   stored, so the group receives them again on the next subscription
//! - ordering is guaranteed within a partition (one record id)
//!
//! A message with no payload is delivered with an empty body rather than as an
//! error, so the consumer can count and drop it like any other bad message.
//!
//! # Example
//!
//! ```no_run
//! use todo_events_core::event_bus::{EventBus, OutboundMessage};
//! use todo_events_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("todo-group")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! bus.connect().await?;
//! bus.publish("todo-events", &OutboundMessage::keyed("1", br#"{"action":"delete","data":{"id":"1"}}"#.to_vec())).await?;
//!
//! let mut stream = bus.subscribe("todo-events").await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("{:?}", delivery.payload);
//!     delivery.acknowledge()?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use todo_events_core::event_bus::{
    AckHandle, BusFuture, Delivery, EventBus, EventBusError, EventStream, OutboundMessage,
};

const DEFAULT_ACKS: &str = "all";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_OFFSET_RESET: &str = "earliest";

/// rdkafka-backed [`EventBus`].
///
/// The producer is created once and shared by every publish; each
/// `subscribe` creates its own `StreamConsumer` owned by a background task.
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required)
/// - **Producer settings**: acks (default `all`), compression, send timeout
/// - **Consumer group**: explicit id, or derived from the topic
/// - **Buffer size**: messages buffered between Kafka and the subscriber (default 1000)
/// - **Offset reset**: where a new group starts reading (default `earliest`)
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created from the configuration.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for `topic`.
    #[must_use]
    pub fn consumer_group_for(&self, topic: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("todo-events-{topic}"))
    }
}

/// Builder for [`RedpandaEventBus`].
///
/// ```no_run
/// use todo_events_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses, e.g. `"localhost:9092"`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"` (default).
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"` (default), `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout, also used for the reachability check.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions.
    ///
    /// Instances sharing a group split the topic's partitions between them.
    /// Without one, the group is `todo-events-<topic>`.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Messages buffered between the Kafka consumer and the subscriber.
    ///
    /// Zero is raised to one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` (default),
    /// `"latest"` or `"error"`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus. Does not contact the brokers; see [`EventBus::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or(DEFAULT_ACKS);
        let compression = self.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION);
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            acks = acks,
            compression = compression,
            buffer_size = buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn connect(&self) -> BusFuture<'_, ()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let brokers = self.brokers.clone();

        Box::pin(async move {
            // fetch_metadata blocks the calling thread.
            let metadata = tokio::task::spawn_blocking(move || {
                producer
                    .client()
                    .fetch_metadata(None, Timeout::After(timeout))
                    .map(|m| m.brokers().len())
            })
            .await
            .map_err(|e| EventBusError::ConnectionFailed(format!("Metadata task failed: {e}")))?;

            match metadata {
                Ok(broker_count) => {
                    tracing::info!(brokers = %brokers, broker_count, "Connected to brokers");
                    Ok(())
                },
                Err(e) => {
                    tracing::error!(brokers = %brokers, error = %e, "Brokers unreachable");
                    Err(EventBusError::ConnectionFailed(format!(
                        "Failed to fetch metadata from {brokers}: {e}"
                    )))
                },
            }
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, message: &'a OutboundMessage) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut record: FutureRecord<'_, str, Vec<u8>> =
                FutureRecord::to(topic).payload(&message.payload);
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        key = message.key.as_deref().unwrap_or(""),
                        "Message delivered"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to deliver message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BusFuture<'a, EventStream> {
        let consumer_group_id = self.consumer_group_for(topic);
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "true")
                .set("enable.auto.offset.store", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic])
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group_id,
                buffer_size = buffer_size,
                auto_offset_reset = %auto_offset_reset,
                offset_store = "on-acknowledge",
                "Subscribed to topic"
            );

            let consumer = Arc::new(consumer);
            let (tx, mut rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task and every unacknowledged delivery share the consumer.
            // Dropping the returned stream closes the channel, which ends the
            // task; the consumer leaves the group once the last delivery is
            // dropped.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                loop {
                    let msg_result = tokio::select! {
                        () = tx.closed() => {
                            tracing::debug!("Subscriber dropped, exiting consumer task");
                            break;
                        }
                        next = stream.next() => match next {
                            Some(msg_result) => msg_result,
                            None => break,
                        },
                    };

                    let item = match msg_result {
                        Ok(message) => Ok(Delivery {
                            topic: message.topic().to_string(),
                            partition: message.partition(),
                            offset: message.offset(),
                            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                            ack: offset_store(
                                Arc::clone(&consumer),
                                message.topic(),
                                message.partition(),
                                message.offset(),
                            ),
                        }),
                        Err(e) => Err(EventBusError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };

                    if tx.send(item).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

/// Acknowledgement that stores `offset + 1` for `topic`/`partition`, the
/// position the group resumes from.
fn offset_store(
    consumer: Arc<StreamConsumer>,
    topic: &str,
    partition: i32,
    offset: i64,
) -> AckHandle {
    let topic = topic.to_string();
    AckHandle::new(move || {
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
            .and_then(|()| consumer.store_offsets(&positions))
            .map_err(|e| {
                EventBusError::TransportError(format!(
                    "Failed to store offset {offset} for {topic}/{partition}: {e}"
                ))
            })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_requires_brokers() {
        assert!(matches!(
            RedpandaEventBus::builder().build(),
            Err(EventBusError::ConnectionFailed(_))
        ));
        assert!(matches!(
            RedpandaEventBus::builder().brokers("  ").build(),
            Err(EventBusError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn build_does_not_contact_brokers() {
        let bus = RedpandaEventBus::builder()
            .brokers("localhost:1")
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        assert_eq!(bus.brokers(), "localhost:1");
    }

    #[tokio::test]
    async fn consumer_group_defaults_to_topic() {
        let bus = RedpandaEventBus::new("localhost:9092").unwrap();
        assert_eq!(bus.consumer_group_for("todo-events"), "todo-events-todo-events");

        let grouped = RedpandaEventBus::builder()
            .brokers("localhost:9092")
            .consumer_group("todo-group")
            .build()
            .unwrap();
        assert_eq!(grouped.consumer_group_for("todo-events"), "todo-group");
    }

    #[tokio::test]
    async fn connect_fails_fast_on_unreachable_brokers() {
        let bus = RedpandaEventBus::builder()
            .brokers("127.0.0.1:1")
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        assert!(matches!(
            bus.connect().await,
            Err(EventBusError::ConnectionFailed(_))
        ));
    }
}
