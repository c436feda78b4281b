//! Todo use cases.
//!
//! Writes go through [`TodoMutations`]: validate, build an envelope, publish.
//! They never touch the record store; the store only changes when the
//! consumer applies the published event. A successful mutation therefore
//! means "the event is on the topic", not "the store has changed", and a read
//! issued right after may not reflect it yet.
//!
//! Reads go through [`TodoQueries`], straight to the store.

use crate::envelope::Envelope;
use crate::event_bus::EventBusError;
use crate::publisher::EventPublisher;
use crate::record::{Record, RecordId, Title, ValidationError};
use crate::store::{RecordStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Default topic shared by the publisher and the consumer.
pub const DEFAULT_TOPIC: &str = "todo-events";

/// Why a mutation was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Input rejected; nothing was published.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event could not be published; the store will not change.
    #[error(transparent)]
    Broker(#[from] EventBusError),
}

/// Create, update and delete todos by publishing events.
#[derive(Clone)]
pub struct TodoMutations {
    publisher: EventPublisher,
    topic: String,
}

impl TodoMutations {
    /// Create the use cases, publishing to `topic`.
    #[must_use]
    pub fn new(publisher: EventPublisher, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Create a todo with a freshly generated id.
    ///
    /// The record is returned only after its `create` event was published.
    ///
    /// # Errors
    ///
    /// - [`MutationError::Validation`] if the title is empty
    /// - [`MutationError::Broker`] if publishing fails
    pub async fn create(&self, title: impl Into<String>) -> Result<Record, MutationError> {
        let title = Title::parse(title)?;
        let record = Record::new(RecordId::generate(), title);

        self.publisher
            .publish(&self.topic, &Envelope::create(record.clone()))
            .await?;

        Ok(record)
    }

    /// Retitle a todo.
    ///
    /// Returns the proposed record as soon as the event is published; the
    /// store is updated later by the consumer, and not at all if the id
    /// does not exist.
    ///
    /// # Errors
    ///
    /// - [`MutationError::Validation`] if the title is empty
    /// - [`MutationError::Broker`] if publishing fails
    pub async fn update(
        &self,
        id: RecordId,
        title: impl Into<String>,
    ) -> Result<Record, MutationError> {
        let title = Title::parse(title)?;
        let record = Record::new(id, title);

        self.publisher
            .publish(
                &self.topic,
                &Envelope::update(record.id.clone(), record.title.clone()),
            )
            .await?;

        Ok(record)
    }

    /// Delete a todo. Deleting an unknown id is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Broker`] if publishing fails.
    pub async fn delete(&self, id: RecordId) -> Result<(), MutationError> {
        self.publisher
            .publish(&self.topic, &Envelope::delete(id))
            .await?;
        Ok(())
    }
}

/// Read-side use cases, served directly from the store.
#[derive(Clone)]
pub struct TodoQueries {
    store: Arc<dyn RecordStore>,
}

impl TodoQueries {
    /// Create the queries over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Every todo currently in the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub async fn fetch_all(&self) -> Result<Vec<Record>, StoreError> {
        self.store.fetch_all().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event_bus::{BusFuture, EventBus, EventStream, OutboundMessage};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Envelope>>,
        down: AtomicBool,
    }

    impl EventBus for Outbox {
        fn connect(&self) -> BusFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn publish<'a>(
            &'a self,
            topic: &'a str,
            message: &'a OutboundMessage,
        ) -> BusFuture<'a, ()> {
            Box::pin(async move {
                if self.down.load(Ordering::SeqCst) {
                    return Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: "broker down".to_string(),
                    });
                }
                let envelope: Envelope = serde_json::from_slice(&message.payload).unwrap();
                self.sent.lock().unwrap().push(envelope);
                Ok(())
            })
        }

        fn subscribe<'a>(&'a self, topic: &'a str) -> BusFuture<'a, EventStream> {
            Box::pin(async move {
                Err(EventBusError::SubscriptionFailed {
                    topic: topic.to_string(),
                    reason: "publish-only".to_string(),
                })
            })
        }
    }

    fn setup() -> (Arc<Outbox>, TodoMutations) {
        let outbox = Arc::new(Outbox::default());
        let mutations = TodoMutations::new(EventPublisher::new(outbox.clone()), DEFAULT_TOPIC);
        (outbox, mutations)
    }

    #[tokio::test]
    async fn create_publishes_the_returned_record() {
        let (outbox, mutations) = setup();

        let record = mutations.create("Buy milk").await.unwrap();

        assert_eq!(record.title, "Buy milk");
        assert!(!record.id.as_str().is_empty());
        assert_eq!(*outbox.sent.lock().unwrap(), vec![Envelope::create(record)]);
    }

    #[tokio::test]
    async fn empty_title_publishes_nothing() {
        let (outbox, mutations) = setup();

        assert_eq!(
            mutations.create("").await.unwrap_err(),
            MutationError::Validation(ValidationError::EmptyTitle)
        );
        assert_eq!(
            mutations.update(RecordId::new("1"), "  ").await.unwrap_err(),
            MutationError::Validation(ValidationError::EmptyTitle)
        );
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_returns_the_proposed_record() {
        let (outbox, mutations) = setup();

        let record = mutations
            .update(RecordId::new("1"), "Buy oat milk")
            .await
            .unwrap();

        assert_eq!(record.id, RecordId::new("1"));
        assert_eq!(record.title, "Buy oat milk");
        assert_eq!(
            *outbox.sent.lock().unwrap(),
            vec![Envelope::update(RecordId::new("1"), "Buy oat milk")]
        );
    }

    #[tokio::test]
    async fn delete_of_unknown_id_still_publishes() {
        let (outbox, mutations) = setup();

        mutations.delete(RecordId::new("nonexistent")).await.unwrap();

        assert_eq!(
            *outbox.sent.lock().unwrap(),
            vec![Envelope::delete(RecordId::new("nonexistent"))]
        );
    }

    #[tokio::test]
    async fn publish_failure_fails_the_mutation() {
        let (outbox, mutations) = setup();
        outbox.down.store(true, Ordering::SeqCst);

        assert!(matches!(
            mutations.create("Buy milk").await,
            Err(MutationError::Broker(EventBusError::PublishFailed { .. }))
        ));
        assert!(matches!(
            mutations.delete(RecordId::new("1")).await,
            Err(MutationError::Broker(_))
        ));
    }

    proptest! {
        #[test]
        fn every_non_blank_title_yields_one_create_with_a_fresh_id(
            titles in prop::collection::vec("[a-zA-Z0-9 ]{0,8}[a-zA-Z0-9][a-zA-Z0-9 ]{0,8}", 1..8)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (outbox, mutations) = setup();

            let records: Vec<Record> = runtime.block_on(async {
                let mut records = Vec::new();
                for title in &titles {
                    records.push(mutations.create(title.clone()).await.unwrap());
                }
                records
            });

            let sent = outbox.sent.lock().unwrap();
            prop_assert_eq!(sent.len(), titles.len());
            for (record, envelope) in records.iter().zip(sent.iter()) {
                prop_assert_eq!(envelope, &Envelope::create(record.clone()));
            }
            let mut ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), titles.len());
        }
    }
}
