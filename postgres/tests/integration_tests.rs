//! Integration tests for `PostgresRecordStore` using testcontainers.
//!
//! Docker must be running. Each test starts its own `PostgreSQL` container.

#![allow(clippy::expect_used)]

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use todo_events_core::record::RecordId;
use todo_events_core::store::{RecordStore, StoreError};
use todo_events_postgres::PostgresRecordStore;
use todo_events_testing::helpers::record;

/// Start a container and return a migrated store.
///
/// The container is returned so it stays alive for the test.
async fn setup_store() -> (ContainerAsync<Postgres>, PostgresRecordStore) {
    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start postgres container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    let store = PostgresRecordStore::connect(&url, 5)
        .await
        .expect("Failed to connect");
    store.migrate().await.expect("Failed to migrate");
    (container, store)
}

#[tokio::test]
#[ignore]
async fn test_add_and_fetch_ordered_by_id() {
    let (_container, store) = setup_store().await;

    store
        .add_record(record("b", "second").expect("record"))
        .await
        .expect("add b");
    store
        .add_record(record("a", "first").expect("record"))
        .await
        .expect("add a");

    let all = store.fetch_all().await.expect("fetch");
    assert_eq!(
        all,
        vec![
            record("a", "first").expect("record"),
            record("b", "second").expect("record"),
        ]
    );
}

#[tokio::test]
#[ignore]
async fn test_duplicate_add_is_rejected() {
    let (_container, store) = setup_store().await;
    store
        .add_record(record("1", "original").expect("record"))
        .await
        .expect("add");

    let err = store
        .add_record(record("1", "copy").expect("record"))
        .await
        .expect_err("duplicate should fail");

    assert_eq!(err, StoreError::DuplicateKey(RecordId::new("1")));
    let all = store.fetch_all().await.expect("fetch");
    assert_eq!(all[0].title, "original");
}

#[tokio::test]
#[ignore]
async fn test_update_and_delete() {
    let (_container, store) = setup_store().await;
    let id = RecordId::new("1");
    store
        .add_record(record("1", "Buy milk").expect("record"))
        .await
        .expect("add");

    let updated = store
        .update_record(&id, "Buy oat milk")
        .await
        .expect("update");
    assert_eq!(updated.title, "Buy oat milk");

    store.delete_record(&id).await.expect("delete");
    assert!(store.fetch_all().await.expect("fetch").is_empty());

    // Missing ids: update is NotFound, delete is a no-op.
    assert_eq!(
        store.update_record(&id, "x").await,
        Err(StoreError::NotFound(id.clone()))
    );
    store.delete_record(&id).await.expect("delete missing");
}

#[tokio::test]
#[ignore]
async fn test_migrate_is_idempotent() {
    let (_container, store) = setup_store().await;
    store.migrate().await.expect("second migrate");
}
