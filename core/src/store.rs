//! Record store abstraction.
//!
//! The store holds the current state of every todo record. On the write path
//! its only caller is the consumer's dispatcher; reads (`fetch_all`) come
//! straight from the HTTP layer.
//!
//! The four operations below are the entire surface the event pipeline
//! depends on. Backends decide how they persist records.
//!
//! # Failure semantics
//!
//! | Operation       | Missing id            | Existing id            |
//! |-----------------|-----------------------|------------------------|
//! | `add_record`    | inserts               | [`StoreError::DuplicateKey`] |
//! | `update_record` | [`StoreError::NotFound`] | retitles            |
//! | `delete_record` | no-op, `Ok(())`       | removes                |

use crate::record::{Record, RecordId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by a record store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with this id already exists.
    #[error("Record {0} already exists")]
    DuplicateKey(RecordId),

    /// No record with this id exists.
    #[error("Record {0} not found")]
    NotFound(RecordId),

    /// Backend failure (connection, query, I/O).
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Boxed future returned by [`RecordStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence collaborator for todo records.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared between the
/// consumer loop and concurrent HTTP reads.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the store can be held as
/// `Arc<dyn RecordStore>`.
pub trait RecordStore: Send + Sync {
    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DuplicateKey`] if the id already exists
    /// - [`StoreError::Backend`] on backend failure
    fn add_record(&self, record: Record) -> StoreFuture<'_, Record>;

    /// Replace the title of an existing record and return the updated record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the id does not exist
    /// - [`StoreError::Backend`] on backend failure
    fn update_record<'a>(&'a self, id: &'a RecordId, title: &'a str) -> StoreFuture<'a, Record>;

    /// Remove a record. Deleting a missing id succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn delete_record<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ()>;

    /// Return every record.
    ///
    /// Order is unspecified by this contract.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on backend failure.
    fn fetch_all(&self) -> StoreFuture<'_, Vec<Record>>;
}
