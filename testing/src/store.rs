//! Call-recording record store.

use std::sync::{Arc, Mutex, PoisonError};
use todo_events_core::InMemoryRecordStore;
use todo_events_core::record::{Record, RecordId};
use todo_events_core::store::{RecordStore, StoreFuture};

/// A store operation seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `add_record`
    Add(Record),
    /// `update_record`
    Update(RecordId, String),
    /// `delete_record`
    Delete(RecordId),
    /// `fetch_all`
    FetchAll,
}

/// Wraps another store and records every call made to it, in order.
#[derive(Clone)]
pub struct RecordingStore {
    inner: Arc<dyn RecordStore>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
}

impl RecordingStore {
    /// Record calls made to `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record calls made to a fresh [`InMemoryRecordStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRecordStore::new()))
    }

    /// Calls seen so far.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls seen so far, excluding reads.
    #[must_use]
    pub fn writes(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|call| *call != StoreCall::FetchAll)
            .collect()
    }

    fn push(&self, call: StoreCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl RecordStore for RecordingStore {
    fn add_record(&self, record: Record) -> StoreFuture<'_, Record> {
        self.push(StoreCall::Add(record.clone()));
        self.inner.add_record(record)
    }

    fn update_record<'a>(&'a self, id: &'a RecordId, title: &'a str) -> StoreFuture<'a, Record> {
        self.push(StoreCall::Update(id.clone(), title.to_string()));
        self.inner.update_record(id, title)
    }

    fn delete_record<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ()> {
        self.push(StoreCall::Delete(id.clone()));
        self.inner.delete_record(id)
    }

    fn fetch_all(&self) -> StoreFuture<'_, Vec<Record>> {
        self.push(StoreCall::FetchAll);
        self.inner.fetch_all()
    }
}
