//! Test infrastructure: an in-memory SQLite store and raw-log inspection.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;

use crate::store::SqliteStore;

/// A migrated, in-memory [`SqliteStore`].
///
/// A SQLite `:memory:` database exists per connection, so the pool is
/// pinned to a single connection.
pub async fn memory_store() -> SqliteStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("in-memory sqlite pool");
    let store = SqliteStore::new(pool);
    store.migrate().await.expect("migrations");
    store
}

/// Everything in the log, in sequence order, as
/// `(sequence_number, event_type, payload)`.
pub async fn recorded_events(store: &SqliteStore) -> Vec<(i64, String, serde_json::Value)> {
    let rows = sqlx::query(
        "SELECT sequence_number, event_type, payload FROM events ORDER BY sequence_number",
    )
    .fetch_all(store.pool())
    .await
    .expect("read events table");

    rows.into_iter()
        .map(|row| {
            let payload: String = row.get("payload");
            (
                row.get("sequence_number"),
                row.get("event_type"),
                serde_json::from_str(&payload).expect("stored payload is JSON"),
            )
        })
        .collect()
}
