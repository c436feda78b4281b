//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! Marked `#[ignore]`: they need Docker (testcontainers) and take tens of
//! seconds to start Kafka. Run explicitly with:
//!
//! ```bash
//! cargo test -p todo-events-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use todo_events_core::event_bus::{EventBus, OutboundMessage};
use todo_events_core::{
    ConsumerState, Dispatcher, Envelope, EventConsumer, EventPublisher, RecordId, TodoMutations,
};
use todo_events_redpanda::RedpandaEventBus;
use todo_events_testing::InMemoryRecordStore;
use todo_events_testing::helpers::eventually_within;

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_kafka_ready(&brokers).await;
    (kafka, brokers)
}

async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = RedpandaEventBus::builder()
            .brokers(brokers)
            .timeout(Duration::from_secs(2))
            .build()
        {
            if bus.connect().await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

/// Publish a warmup message so the topic is auto-created before subscribing.
async fn ensure_topic_exists(bus: &RedpandaEventBus, topic: &str) {
    let warmup = OutboundMessage::keyed("warmup", br#"{"action":"warmup","data":{}}"#.to_vec());
    for attempt in 1..=30 {
        if bus.publish(topic, &warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != 30, "Failed to create topic {topic}");
    }
}

#[tokio::test]
#[ignore]
async fn test_publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&bus, "round-trip").await;

    let mut stream = bus.subscribe("round-trip").await.expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let envelope = Envelope::delete(RecordId::new("42"));
    let body = envelope.encode().unwrap();
    bus.publish("round-trip", &OutboundMessage::keyed("42", body.clone()))
        .await
        .expect("Failed to publish");

    let received = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let delivery = stream
                .next()
                .await
                .expect("stream ended")
                .expect("transport error");
            if delivery.payload == body {
                return delivery;
            }
        }
    })
    .await
    .expect("Timeout waiting for message");

    assert_eq!(received.topic, "round-trip");
    assert!(received.offset >= 0);
}

#[tokio::test]
#[ignore]
async fn test_empty_payload_is_delivered_as_empty_body() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&bus, "empty-bodies").await;

    let mut stream = bus.subscribe("empty-bodies").await.expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    bus.publish("empty-bodies", &OutboundMessage::keyed("k", Vec::new()))
        .await
        .expect("Failed to publish");

    let found = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(delivery)) = stream.next().await {
            if delivery.payload.is_empty() {
                return true;
            }
        }
        false
    })
    .await
    .expect("Timeout waiting for message");

    assert!(found);
}

#[tokio::test]
#[ignore]
async fn test_mutations_are_applied_through_kafka() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&brokers)
            .consumer_group("todo-group")
            .auto_offset_reset("earliest")
            .build()
            .expect("Failed to create event bus"),
    );
    ensure_topic_exists(&bus, "todo-events").await;

    let store = Arc::new(InMemoryRecordStore::new());
    let mut consumer = EventConsumer::new("kafka-test", bus.clone(), Dispatcher::new(store.clone()));
    consumer.connect().await.expect("connect");
    consumer.subscribe("todo-events").await.expect("subscribe");
    consumer.run().expect("run");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mutations = TodoMutations::new(EventPublisher::new(bus.clone()), "todo-events");
    let created = mutations.create("Buy milk").await.expect("create");
    mutations
        .update(created.id.clone(), "Buy oat milk")
        .await
        .expect("update");

    let applied = eventually_within(Duration::from_secs(15), || {
        store
            .get(&created.id)
            .is_some_and(|r| r.title == "Buy oat milk")
    })
    .await;
    assert!(applied, "update was not applied");

    mutations.delete(created.id.clone()).await.expect("delete");
    let removed = eventually_within(Duration::from_secs(15), || store.get(&created.id).is_none()).await;
    assert!(removed, "delete was not applied");

    assert_eq!(consumer.state(), ConsumerState::Running);
    consumer.disconnect().await;
    assert_eq!(consumer.state(), ConsumerState::Disconnected);
}

#[tokio::test]
#[ignore]
async fn test_unacknowledged_messages_are_redelivered_to_the_group() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("ack-group")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&bus, "acks").await;

    // Same key: one partition, publish order.
    for body in [b"first".to_vec(), b"second".to_vec()] {
        bus.publish("acks", &OutboundMessage::keyed("warmup", body))
            .await
            .expect("Failed to publish");
    }

    {
        let mut stream = bus.subscribe("acks").await.expect("Failed to subscribe");
        tokio::time::timeout(Duration::from_secs(20), async {
            loop {
                let delivery = stream
                    .next()
                    .await
                    .expect("stream ended")
                    .expect("transport error");
                if delivery.payload == b"second" {
                    // Received, never acknowledged.
                    break;
                }
                delivery.acknowledge().expect("acknowledge");
            }
        })
        .await
        .expect("Timeout waiting for messages");
    }
    // Let the first member commit and leave the group.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut stream = bus.subscribe("acks").await.expect("Failed to resubscribe");
    let redelivered = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timeout waiting for redelivery")
        .expect("stream ended")
        .expect("transport error");

    assert_eq!(redelivered.payload, b"second");
}
