//! # Todo Events Testing
//!
//! Test support: a call-recording record store and small helpers for tests
//! that have to wait on the consumer. The in-memory bus and store themselves
//! live in `todo-events-core` behind the `memory` feature and are re-exported
//! here.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use todo_events_core::{Dispatcher, EventConsumer, EventPublisher, TodoMutations};
//! use todo_events_testing::{InMemoryEventBus, InMemoryRecordStore, helpers::eventually};
//!
//! #[tokio::test]
//! async fn created_todo_becomes_visible() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     let store = Arc::new(InMemoryRecordStore::new());
//!
//!     let mut consumer = EventConsumer::new("test", bus.clone(), Dispatcher::new(store.clone()));
//!     consumer.connect().await.unwrap();
//!     consumer.subscribe("todo-events").await.unwrap();
//!     consumer.run().unwrap();
//!
//!     let mutations = TodoMutations::new(EventPublisher::new(bus), "todo-events");
//!     let record = mutations.create("Buy milk").await.unwrap();
//!
//!     assert!(eventually(|| store.get(&record.id).is_some()).await);
//! }
//! ```

pub mod store;

pub use store::{RecordingStore, StoreCall};
pub use todo_events_core::memory::{InMemoryEventBus, InMemoryRecordStore};

/// Test helpers.
pub mod helpers {
    use std::time::Duration;
    use todo_events_core::record::{Record, RecordId, Title, ValidationError};

    /// How long [`eventually`] waits before giving up.
    pub const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(2);

    /// Poll `condition` until it holds or [`EVENTUALLY_TIMEOUT`] passes.
    ///
    /// Returns whether the condition was met.
    pub async fn eventually<F>(condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        eventually_within(EVENTUALLY_TIMEOUT, condition).await
    }

    /// Poll `condition` until it holds or `timeout` passes.
    pub async fn eventually_within<F>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Build a record from raw parts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTitle`] for a blank title.
    pub fn record(id: &str, title: &str) -> Result<Record, ValidationError> {
        Ok(Record::new(RecordId::new(id), Title::parse(title)?))
    }
}
