//! `PostgreSQL` record store for the todo service.
//!
//! Implements [`RecordStore`] over a single table:
//!
//! ```sql
//! CREATE TABLE todos (
//!     id TEXT PRIMARY KEY,
//!     title TEXT NOT NULL
//! );
//! ```
//!
//! The table is created by [`PostgresRecordStore::migrate`]. Queries are built
//! at runtime with `sqlx::query`, so no database is needed at compile time.
//!
//! # Example
//!
//! ```ignore
//! use todo_events_postgres::PostgresRecordStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresRecordStore::connect("postgres://localhost/todos", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use todo_events_core::record::{Record, RecordId};
use todo_events_core::store::{RecordStore, StoreError, StoreFuture};

/// PostgreSQL-backed [`RecordStore`].
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool of at most `max_connections` connections to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create the `todos` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn backend(operation: &'static str, e: &sqlx::Error) -> StoreError {
    metrics::counter!("todo_events.store.errors", "operation" => operation).increment(1);
    StoreError::Backend(format!("Failed to {operation}: {e}"))
}

fn to_record(row: &sqlx::postgres::PgRow) -> Result<Record, StoreError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| StoreError::Backend(format!("Invalid id column: {e}")))?;
    let title: String = row
        .try_get("title")
        .map_err(|e| StoreError::Backend(format!("Invalid title column: {e}")))?;
    Ok(Record {
        id: RecordId::new(id),
        title,
    })
}

impl RecordStore for PostgresRecordStore {
    fn add_record(&self, record: Record) -> StoreFuture<'_, Record> {
        Box::pin(async move {
            sqlx::query("INSERT INTO todos (id, title) VALUES ($1, $2)")
                .bind(record.id.as_str())
                .bind(&record.title)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    if let sqlx::Error::Database(db_err) = &e {
                        if db_err.is_unique_violation() {
                            return StoreError::DuplicateKey(record.id.clone());
                        }
                    }
                    backend("insert record", &e)
                })?;

            tracing::debug!(record_id = %record.id, "Record inserted");
            Ok(record)
        })
    }

    fn update_record<'a>(&'a self, id: &'a RecordId, title: &'a str) -> StoreFuture<'a, Record> {
        Box::pin(async move {
            let row = sqlx::query("UPDATE todos SET title = $2 WHERE id = $1 RETURNING id, title")
                .bind(id.as_str())
                .bind(title)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| backend("update record", &e))?;

            match row {
                Some(row) => to_record(&row),
                None => Err(StoreError::NotFound(id.clone())),
            }
        })
    }

    fn delete_record<'a>(&'a self, id: &'a RecordId) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM todos WHERE id = $1")
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| backend("delete record", &e))?;

            if result.rows_affected() == 0 {
                tracing::debug!(record_id = %id, "Delete of missing record ignored");
            }
            Ok(())
        })
    }

    fn fetch_all(&self) -> StoreFuture<'_, Vec<Record>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT id, title FROM todos ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| backend("fetch records", &e))?;

            rows.iter().map(to_record).collect()
        })
    }
}
