use crate::record::{Record, RecordId};
use crate::store::{RecordStore, StoreError, StoreFuture};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// [`RecordStore`] backed by an ordered map.
///
/// `fetch_all` returns records ordered by id.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<BTreeMap<RecordId, Record>>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look a record up by id.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Backend("record map lock poisoned".to_string())
}

impl RecordStore for InMemoryRecordStore {
    fn add_record(&self, record: Record) -> StoreFuture<'_, Record> {
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            if records.contains_key(&record.id) {
                return Err(StoreError::DuplicateKey(record.id));
            }
            records.insert(record.id.clone(), record.clone());
            Ok(record)
        })
    }

    fn update_record<'a>(&'a self, id: &'a RecordId, title: &'a str) -> StoreFuture<'a, Record> {
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            let record = records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            record.title = title.to_string();
            Ok(record.clone())
        })
    }

    fn delete_record<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut records = self.records.write().map_err(poisoned)?;
            if records.remove(id).is_none() {
                tracing::debug!(record_id = %id, "Delete of missing record ignored");
            }
            Ok(())
        })
    }

    fn fetch_all(&self) -> StoreFuture<'_, Vec<Record>> {
        Box::pin(async move {
            let records = self.records.read().map_err(poisoned)?;
            Ok(records.values().cloned().collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::Title;

    fn record(id: &str, title: &str) -> Record {
        Record::new(RecordId::new(id), Title::parse(title).unwrap())
    }

    #[tokio::test]
    async fn add_then_fetch_is_ordered_by_id() {
        let store = InMemoryRecordStore::new();
        store.add_record(record("b", "second")).await.unwrap();
        store.add_record(record("a", "first")).await.unwrap();

        let all = store.fetch_all().await.unwrap();
        assert_eq!(all, vec![record("a", "first"), record("b", "second")]);
    }

    #[tokio::test]
    async fn duplicate_add_keeps_the_original() {
        let store = InMemoryRecordStore::with_records([record("1", "original")]);

        let err = store.add_record(record("1", "copy")).await.unwrap_err();

        assert_eq!(err, StoreError::DuplicateKey(RecordId::new("1")));
        assert_eq!(store.get(&RecordId::new("1")).unwrap().title, "original");
    }

    #[tokio::test]
    async fn missing_id_is_not_found_on_update_and_ignored_on_delete() {
        let store = InMemoryRecordStore::new();
        let id = RecordId::new("missing");

        assert_eq!(
            store.update_record(&id, "x").await.unwrap_err(),
            StoreError::NotFound(id.clone())
        );
        store.delete_record(&id).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn update_changes_only_the_title() {
        let store = InMemoryRecordStore::with_records([record("1", "old")]);

        let updated = store
            .update_record(&RecordId::new("1"), "new")
            .await
            .unwrap();

        assert_eq!(updated, record("1", "new"));
        assert_eq!(store.len(), 1);
    }
}
