//! In-memory, partitioned event bus.
//!
//! Behaves like a single-broker Kafka topic read by one consumer group:
//!
//! - each topic has a fixed number of partitions (default 3)
//! - a message's partition is derived from its key, so equal keys share a partition
//! - offsets grow per partition
//! - a message is retained until a subscriber acknowledges it (or a later
//!   offset on its partition); acknowledged messages are released
//! - a new subscription first replays every retained message, then receives
//!   live messages
//!
//! Fault injection covers the two broker failures the pipeline cares about:
//! [`InMemoryEventBus::fail_next_publishes`] and
//! [`InMemoryEventBus::set_unreachable`].

use crate::event_bus::{
    AckHandle, BusFuture, Delivery, EventBus, EventBusError, EventStream, OutboundMessage,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

type Subscriber = mpsc::UnboundedSender<Result<Delivery, EventBusError>>;

#[derive(Default)]
struct Topic {
    retained: VecDeque<Delivery>,
    next_offsets: Vec<i64>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, Topic>,
    failing_publishes: usize,
    unreachable: bool,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`EventBus`] for tests and broker-less runs.
///
/// Cheap to clone; clones share the same topics.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Inner>>,
    partitions: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Create a bus with three partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(3)
    }

    /// Create a bus with `partitions` partitions per topic (at least one).
    #[must_use]
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            partitions: partitions.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Make the next `count` publishes fail with [`EventBusError::PublishFailed`].
    pub fn fail_next_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Make `connect` and `subscribe` fail until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Messages on `topic` that no subscriber has acknowledged yet, in
    /// publish order.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Vec<Delivery> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.retained.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// End every open subscription stream.
    pub fn close(&self) {
        for topic in self.lock().topics.values_mut() {
            topic.subscribers.clear();
        }
    }

    /// Partition a key maps to.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn partition_for(&self, key: Option<&str>) -> i32 {
        let Some(key) = key else {
            return 0;
        };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as i32
    }

    /// Copy of `delivery` whose acknowledgement releases it from the topic.
    fn handed_out(&self, delivery: &Delivery) -> Delivery {
        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let topic = delivery.topic.clone();
        let (partition, offset) = (delivery.partition, delivery.offset);

        let mut copy = delivery.clone();
        copy.ack = AckHandle::new(move || {
            // The bus is gone: nothing left to release.
            let Some(inner) = inner.upgrade() else {
                return Ok(());
            };
            if let Some(entry) = lock(&inner).topics.get_mut(&topic) {
                entry
                    .retained
                    .retain(|d| d.partition != partition || d.offset > offset);
            }
            Ok(())
        });
        copy
    }
}

impl EventBus for InMemoryEventBus {
    fn connect(&self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            if self.lock().unreachable {
                return Err(EventBusError::ConnectionFailed(
                    "in-memory broker marked unreachable".to_string(),
                ));
            }
            Ok(())
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, message: &'a OutboundMessage) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let partition = self.partition_for(message.key.as_deref());
            let partitions = self.partitions;
            let mut inner = self.lock();

            if inner.failing_publishes > 0 {
                inner.failing_publishes -= 1;
                return Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }

            let entry = inner.topics.entry(topic.to_string()).or_default();
            if entry.next_offsets.is_empty() {
                entry.next_offsets = vec![0; partitions];
            }
            #[allow(clippy::cast_sign_loss)]
            let slot = &mut entry.next_offsets[partition as usize];
            let delivery = Delivery {
                topic: topic.to_string(),
                partition,
                offset: *slot,
                payload: message.payload.clone(),
                ack: AckHandle::none(),
            };
            *slot += 1;

            let live = self.handed_out(&delivery);
            entry
                .subscribers
                .retain(|subscriber| subscriber.send(Ok(live.clone())).is_ok());
            entry.retained.push_back(delivery);

            tracing::trace!(topic = %topic, partition, "In-memory publish");
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BusFuture<'a, EventStream> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.unreachable {
                return Err(EventBusError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: "in-memory broker marked unreachable".to_string(),
                });
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            let entry = inner.topics.entry(topic.to_string()).or_default();
            for delivery in &entry.retained {
                // Receiver is alive: it is still in this scope.
                let _ = tx.send(Ok(self.handed_out(delivery)));
            }
            entry.subscribers.push(tx);
            drop(inner);

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}
