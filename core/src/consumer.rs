//! Event consumer: the receive loop that mirrors topic events into the store.
//!
//! # Lifecycle
//!
//! ```text
//!                connect()          subscribe(topic)          run()
//! Disconnected ───────────► Connected ───────────────► Subscribed ─────► Running
//!      ▲                                                                   │
//!      └──────────── disconnect() from any state, or stream end ───────────┘
//! ```
//!
//! There is no paused state. Once the consumer is back in `Disconnected`
//! (explicitly or because the broker stream ended) it stays there until
//! `connect()` is called again; it never reconnects on its own.
//!
//! # Receive loop
//!
//! `run()` spawns exactly one task per consumer. The task pulls deliveries
//! from the subscription stream and hands each body to the [`Dispatcher`],
//! awaiting it before pulling the next one. Messages of one partition are
//! therefore applied in delivery order, one at a time.
//!
//! Nothing that happens to a single message stops the loop: malformed
//! bodies, unknown actions, store failures and per-message transport errors
//! are all logged and skipped.
//!
//! # Shutdown
//!
//! `disconnect()` signals the loop and waits for it. The signal is only
//! observed between messages, so a dispatch that is already running always
//! finishes, and is acknowledged, before the subscription is dropped.
//!
//! # Acknowledgement
//!
//! Each delivery is acknowledged right after its dispatch returns, whatever
//! the outcome. Messages the bus has handed over but the loop has not reached
//! yet stay unacknowledged, so the next subscription receives them again.

use crate::dispatcher::Dispatcher;
use crate::event_bus::{EventBus, EventBusError, EventStream};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Lifecycle state of an [`EventConsumer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    /// No broker connection.
    Disconnected,
    /// Broker reachable, no subscription.
    Connected,
    /// Subscription open, loop not started.
    Subscribed,
    /// Receive loop running.
    Running,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Errors from consumer lifecycle calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// The call is not valid in the current state.
    #[error("Cannot {operation} while {actual} (must be {expected})")]
    InvalidState {
        /// Lifecycle call that was attempted
        operation: &'static str,
        /// State the call requires
        expected: ConsumerState,
        /// State the consumer was in
        actual: ConsumerState,
    },

    /// The event bus failed to connect or subscribe.
    #[error(transparent)]
    Bus(#[from] EventBusError),
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Consumes the todo topic and applies each event through a [`Dispatcher`].
///
/// # Example
///
/// ```rust,ignore
/// let mut consumer = EventConsumer::new("todo-mirror", bus, Dispatcher::new(store));
/// consumer.connect().await?;
/// consumer.subscribe("todo-events").await?;
/// consumer.run()?;
///
/// // ... later
/// consumer.disconnect().await;
/// ```
pub struct EventConsumer {
    name: String,
    bus: Arc<dyn EventBus>,
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<ConsumerState>>,
    topic: Option<String>,
    stream: Option<EventStream>,
    running: Option<RunningLoop>,
}

impl EventConsumer {
    /// Create a disconnected consumer.
    ///
    /// `name` only appears in logs.
    #[must_use]
    pub fn new(name: impl Into<String>, bus: Arc<dyn EventBus>, dispatcher: Dispatcher) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            name: name.into(),
            bus,
            dispatcher,
            state: Arc::new(state),
            topic: None,
            stream: None,
            running: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Follow lifecycle changes, including the loop ending on its own.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Topic of the current subscription, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    fn require(&self, operation: &'static str, expected: ConsumerState) -> Result<(), ConsumerError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(ConsumerError::InvalidState {
                operation,
                expected,
                actual,
            })
        }
    }

    /// Verify the broker is reachable: `Disconnected -> Connected`.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::InvalidState`] unless disconnected
    /// - [`ConsumerError::Bus`] if the broker cannot be reached
    pub async fn connect(&mut self) -> Result<(), ConsumerError> {
        self.require("connect", ConsumerState::Disconnected)?;

        // A loop that ended on its own leaves a finished task behind.
        self.running = None;

        self.bus.connect().await?;
        self.state.send_replace(ConsumerState::Connected);
        info!(consumer = %self.name, "Consumer connected");
        Ok(())
    }

    /// Open a subscription on `topic`: `Connected -> Subscribed`.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::InvalidState`] unless connected
    /// - [`ConsumerError::Bus`] if the subscription fails
    pub async fn subscribe(&mut self, topic: &str) -> Result<(), ConsumerError> {
        self.require("subscribe", ConsumerState::Connected)?;

        if topic.trim().is_empty() {
            return Err(EventBusError::InvalidTopic(topic.to_string()).into());
        }

        let stream = self.bus.subscribe(topic).await?;
        self.stream = Some(stream);
        self.topic = Some(topic.to_string());
        self.state.send_replace(ConsumerState::Subscribed);
        info!(consumer = %self.name, topic = %topic, "Consumer subscribed");
        Ok(())
    }

    /// Start the receive loop: `Subscribed -> Running`.
    ///
    /// Returns as soon as the loop task is spawned. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::InvalidState`] unless subscribed.
    pub fn run(&mut self) -> Result<(), ConsumerError> {
        self.require("run", ConsumerState::Subscribed)?;

        let Some(stream) = self.stream.take() else {
            return Err(ConsumerError::InvalidState {
                operation: "run",
                expected: ConsumerState::Subscribed,
                actual: ConsumerState::Connected,
            });
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let receive = ReceiveLoop {
            name: self.name.clone(),
            topic: self.topic.clone().unwrap_or_default(),
            dispatcher: self.dispatcher.clone(),
            state: Arc::clone(&self.state),
        };

        self.state.send_replace(ConsumerState::Running);
        let handle = tokio::spawn(receive.run(stream, shutdown_rx));
        self.running = Some(RunningLoop { shutdown, handle });
        Ok(())
    }

    /// Wait for the receive loop to end on its own (the stream closed).
    ///
    /// Returns immediately if no loop is running.
    pub async fn join(&mut self) {
        if let Some(running) = self.running.take() {
            if let Err(e) = running.handle.await {
                error!(consumer = %self.name, error = %e, "Receive loop task failed");
            }
        }
    }

    /// Stop the loop (if any) and release the subscription.
    ///
    /// Safe to call in any state, any number of times. An in-flight dispatch
    /// finishes before this returns.
    pub async fn disconnect(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                error!(consumer = %self.name, error = %e, "Receive loop task failed");
            }
        }

        self.stream = None;
        self.topic = None;
        let previous = self.state.send_replace(ConsumerState::Disconnected);
        if previous != ConsumerState::Disconnected {
            info!(consumer = %self.name, from = %previous, "Consumer disconnected");
        }
    }
}

/// State moved into the spawned receive task.
struct ReceiveLoop {
    name: String,
    topic: String,
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl ReceiveLoop {
    async fn run(self, mut stream: EventStream, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.name, topic = %self.topic, "Receive loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!(consumer = %self.name, "Receive loop received shutdown signal");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    tracing::trace!(
                        consumer = %self.name,
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Dispatching delivery"
                    );
                    self.dispatcher.dispatch(&delivery.payload).await;
                    if let Err(e) = delivery.acknowledge() {
                        warn!(
                            consumer = %self.name,
                            topic = %delivery.topic,
                            partition = delivery.partition,
                            offset = delivery.offset,
                            error = %e,
                            "Failed to acknowledge delivery (message may be redelivered)"
                        );
                    }
                },
                Some(Err(e)) => {
                    warn!(
                        consumer = %self.name,
                        error = %e,
                        "Error receiving message from stream"
                    );
                },
                None => {
                    warn!(consumer = %self.name, topic = %self.topic, "Event stream ended");
                    break;
                },
            }
        }

        drop(stream);
        self.state.send_replace(ConsumerState::Disconnected);
        info!(consumer = %self.name, "Receive loop stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event_bus::{AckHandle, BusFuture, Delivery, OutboundMessage};
    use crate::record::{Record, RecordId};
    use crate::store::{RecordStore, StoreError, StoreFuture};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Bus whose single subscription is fed by the test through `feed`.
    struct ScriptedBus {
        feed: Mutex<Option<mpsc::UnboundedReceiver<Result<Delivery, EventBusError>>>>,
    }

    impl ScriptedBus {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Delivery, EventBusError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    feed: Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    impl EventBus for ScriptedBus {
        fn connect(&self) -> BusFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn publish<'a>(&'a self, _: &'a str, _: &'a OutboundMessage) -> BusFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe<'a>(&'a self, topic: &'a str) -> BusFuture<'a, EventStream> {
            Box::pin(async move {
                let rx = self.feed.lock().unwrap().take().ok_or_else(|| {
                    EventBusError::SubscriptionFailed {
                        topic: topic.to_string(),
                        reason: "already subscribed".to_string(),
                    }
                })?;
                let stream = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(Box::pin(stream) as EventStream)
            })
        }
    }

    #[derive(Default)]
    struct Titles(Mutex<Vec<Record>>);

    impl RecordStore for Titles {
        fn add_record(&self, record: Record) -> StoreFuture<'_, Record> {
            Box::pin(async move {
                self.0.lock().unwrap().push(record.clone());
                Ok(record)
            })
        }

        fn update_record<'a>(&'a self, id: &'a RecordId, _: &'a str) -> StoreFuture<'a, Record> {
            Box::pin(async move { Err(StoreError::NotFound(id.clone())) })
        }

        fn delete_record<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                self.0.lock().unwrap().retain(|r| &r.id != id);
                Ok(())
            })
        }

        fn fetch_all(&self) -> StoreFuture<'_, Vec<Record>> {
            Box::pin(async move { Ok(self.0.lock().unwrap().clone()) })
        }
    }

    fn delivery(offset: i64, body: &str) -> Result<Delivery, EventBusError> {
        Ok(Delivery {
            topic: "todo-events".to_string(),
            partition: 0,
            offset,
            payload: body.as_bytes().to_vec(),
            ack: AckHandle::none(),
        })
    }

    #[tokio::test]
    async fn lifecycle_walks_the_states_in_order() {
        let (bus, _feed) = ScriptedBus::new();
        let store = Arc::new(Titles::default());
        let mut consumer = EventConsumer::new("test", bus, Dispatcher::new(store));

        assert_eq!(consumer.state(), ConsumerState::Disconnected);
        consumer.connect().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Connected);
        consumer.subscribe("todo-events").await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Subscribed);
        assert_eq!(consumer.topic(), Some("todo-events"));
        consumer.run().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);

        consumer.disconnect().await;
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
        assert_eq!(consumer.topic(), None);
    }

    #[tokio::test]
    async fn run_before_subscribe_is_rejected() {
        let (bus, _feed) = ScriptedBus::new();
        let store = Arc::new(Titles::default());
        let mut consumer = EventConsumer::new("test", bus, Dispatcher::new(store));

        let err = consumer.run().unwrap_err();
        assert_eq!(
            err,
            ConsumerError::InvalidState {
                operation: "run",
                expected: ConsumerState::Subscribed,
                actual: ConsumerState::Disconnected,
            }
        );

        consumer.connect().await.unwrap();
        assert!(matches!(
            consumer.run(),
            Err(ConsumerError::InvalidState {
                actual: ConsumerState::Connected,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn disconnect_is_safe_in_every_state() {
        let (bus, _feed) = ScriptedBus::new();
        let store = Arc::new(Titles::default());
        let mut consumer = EventConsumer::new("test", bus, Dispatcher::new(store));

        consumer.disconnect().await;
        consumer.disconnect().await;
        assert_eq!(consumer.state(), ConsumerState::Disconnected);

        consumer.connect().await.unwrap();
        consumer.disconnect().await;
        assert_eq!(consumer.state(), ConsumerState::Disconnected);

        consumer.connect().await.unwrap();
        consumer.subscribe("todo-events").await.unwrap();
        consumer.disconnect().await;
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
    }

    #[tokio::test]
    async fn loop_survives_bad_messages_and_ends_with_the_stream() {
        let (bus, feed) = ScriptedBus::new();
        let store = Arc::new(Titles::default());
        let mut consumer = EventConsumer::new("test", bus, Dispatcher::new(store.clone()));
        consumer.connect().await.unwrap();
        consumer.subscribe("todo-events").await.unwrap();
        consumer.run().unwrap();

        feed.send(delivery(0, "invalid-json")).unwrap();
        feed.send(Err(EventBusError::TransportError("hiccup".to_string())))
            .unwrap();
        feed.send(delivery(1, r#"{"action":"update","data":{"id":"x","title":"y"}}"#))
            .unwrap();
        feed.send(delivery(2, r#"{"action":"create","data":{"id":"1","title":"Buy milk"}}"#))
            .unwrap();
        drop(feed);

        consumer.join().await;

        assert_eq!(consumer.state(), ConsumerState::Disconnected);
        let records = store.fetch_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Buy milk");
    }

    #[tokio::test]
    async fn deliveries_are_acknowledged_after_dispatch() {
        let (bus, feed) = ScriptedBus::new();
        let store = Arc::new(Titles::default());
        let mut consumer = EventConsumer::new("test", bus, Dispatcher::new(store.clone()));
        consumer.connect().await.unwrap();
        consumer.subscribe("todo-events").await.unwrap();
        consumer.run().unwrap();

        // (offset, records in the store when the ack ran)
        let acked = Arc::new(Mutex::new(Vec::new()));
        let bodies = [
            "invalid-json",
            r#"{"action":"create","data":{"id":"1","title":"Buy milk"}}"#,
            r#"{"action":"create","data":{"id":"2","title":"Buy eggs"}}"#,
        ];
        for (offset, body) in (0..).zip(bodies) {
            let seen = acked.clone();
            let view = store.clone();
            let mut next = delivery(offset, body).unwrap();
            next.ack = AckHandle::new(move || {
                seen.lock().unwrap().push((offset, view.0.lock().unwrap().len()));
                if offset == 1 {
                    return Err(EventBusError::TransportError("commit refused".to_string()));
                }
                Ok(())
            });
            feed.send(Ok(next)).unwrap();
        }
        drop(feed);

        consumer.join().await;

        assert_eq!(*acked.lock().unwrap(), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let (bus, _feed) = ScriptedBus::new();
        let store = Arc::new(Titles::default());
        let mut consumer = EventConsumer::new("test", bus, Dispatcher::new(store));
        consumer.connect().await.unwrap();

        let err = consumer.subscribe(" ").await.unwrap_err();

        assert_eq!(
            err,
            ConsumerError::Bus(EventBusError::InvalidTopic(" ".to_string()))
        );
        assert_eq!(consumer.state(), ConsumerState::Connected);
    }
}
