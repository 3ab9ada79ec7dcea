//! The storage seam and the shipped SQLite backend.
//!
//! The engine only needs two operations from storage: run a composed read
//! and return tagged rows, and run a guarded batch insert that either
//! persists the whole batch or refuses it. [`SqliteStore`] implements both
//! over `sqlx::SqlitePool`; the guarded insert is rendered as one
//! statement so the consistency check and the insert share a single atomic
//! evaluation -- splitting them into two round trips would reopen the
//! check-then-act race the guard exists to close.

use async_trait::async_trait;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::compose::ComposedQuery;
use crate::error::StorageError;
use crate::fact::SqlValue;
use crate::placeholders;

/// One row of a composed read: the event, the id of the fact whose
/// predicate it satisfied, and the composition-wide freshness snapshot.
///
/// `max_sequence_number` is the global maximum over all rows the
/// composition matched, repeated on every row -- not a per-row or per-fact
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEventRow {
    pub fact_id: String,
    pub sequence_number: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub max_sequence_number: i64,
}

/// An encoded event ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// The optimistic-concurrency guard for a batch insert: a
/// consistency-check composition and the sequence the caller last saw.
/// The insert may proceed only while the check's maximum is still at or
/// below `last_seen_sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendGuard {
    pub check: ComposedQuery,
    pub last_seen_sequence: i64,
}

/// Storage collaborator contract.
///
/// Implementations must expose a single globally monotonic
/// `sequence_number` over the whole log and must evaluate
/// [`append_batch`](Self::append_batch)'s guard and insert atomically.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Execute a composed read and return its tagged rows in ascending
    /// sequence order.
    async fn fetch(&self, query: &ComposedQuery) -> Result<Vec<TaggedEventRow>, StorageError>;

    /// Execute a scalar count composition (a single `matched_count`
    /// column) and return its value.
    async fn fetch_count(&self, query: &ComposedQuery) -> Result<i64, StorageError>;

    /// Insert the batch if the guard permits it (or unconditionally when
    /// there is no guard). Returns `true` if the batch was persisted,
    /// `false` if the guard refused it. Partial inserts never happen.
    async fn append_batch(
        &self,
        records: &[EventRecord],
        guard: Option<&AppendGuard>,
    ) -> Result<bool, StorageError>;
}

/// SQLite-backed event log.
///
/// Facts query the `events` table created by this crate's migrations:
/// `sequence_number INTEGER PRIMARY KEY AUTOINCREMENT` provides the global
/// version token, payloads and metadata are JSON text.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations that create the events table.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Engine-level SQL carries `$k` placeholders; SQLite wants its
/// explicitly indexed `?k` form, which binds the k-th argument regardless
/// of where the placeholder appears in the text.
fn to_sqlite_placeholders(sql: &str) -> String {
    placeholders::rewrite(sql, |k| format!("?{k}"))
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Text(text) => query.bind(text),
        SqlValue::Integer(integer) => query.bind(integer),
        SqlValue::Real(real) => query.bind(real),
        SqlValue::Boolean(boolean) => query.bind(boolean),
        SqlValue::Null => query.bind(None::<String>),
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn fetch(&self, query: &ComposedQuery) -> Result<Vec<TaggedEventRow>, StorageError> {
        let sql = to_sqlite_placeholders(&query.sql);
        let mut fetch = sqlx::query(&sql);
        for param in &query.params {
            fetch = bind_value(fetch, param);
        }

        let rows = fetch.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| -> Result<TaggedEventRow, StorageError> {
                let payload: String = row.try_get("payload")?;
                Ok(TaggedEventRow {
                    fact_id: row.try_get("fact_id")?,
                    sequence_number: row.try_get("sequence_number")?,
                    event_type: row.try_get("event_type")?,
                    payload: serde_json::from_str(&payload)?,
                    max_sequence_number: row.try_get("max_sequence_number")?,
                })
            })
            .collect()
    }

    async fn fetch_count(&self, query: &ComposedQuery) -> Result<i64, StorageError> {
        let sql = to_sqlite_placeholders(&query.sql);
        let mut fetch = sqlx::query(&sql);
        for param in &query.params {
            fetch = bind_value(fetch, param);
        }

        let row = fetch.fetch_one(&self.pool).await?;
        Ok(row.try_get("matched_count")?)
    }

    async fn append_batch(
        &self,
        records: &[EventRecord],
        guard: Option<&AppendGuard>,
    ) -> Result<bool, StorageError> {
        if records.is_empty() {
            return Ok(true);
        }

        let mut params: Vec<SqlValue> = Vec::with_capacity(records.len() * 3 + 1);
        let mut tuples = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let base = index * 3;
            tuples.push(format!("(?{}, ?{}, ?{})", base + 1, base + 2, base + 3));
            params.push(SqlValue::Text(record.event_type.clone()));
            params.push(SqlValue::Text(record.payload.to_string()));
            params.push(SqlValue::Text(record.metadata.to_string()));
        }

        let sql = match guard {
            None => format!(
                "INSERT INTO events (event_type, payload, metadata) \
                 SELECT column1, column2, column3 FROM (VALUES {})",
                tuples.join(", "),
            ),
            Some(guard) => {
                // The check runs as a scalar subquery of the insert itself,
                // with its placeholders shifted past the VALUES tuples.
                let offset = records.len() * 3;
                let check = placeholders::rewrite(&guard.check.sql, |k| {
                    format!("?{}", k + offset)
                });
                let boundary_index = offset + guard.check.params.len() + 1;
                params.extend(guard.check.params.iter().cloned());
                params.push(SqlValue::Integer(guard.last_seen_sequence));
                format!(
                    "INSERT INTO events (event_type, payload, metadata) \
                     SELECT column1, column2, column3 FROM (VALUES {}) \
                     WHERE COALESCE(({}), 0) <= ?{}",
                    tuples.join(", "),
                    check,
                    boundary_index,
                )
            }
        };

        let mut insert = sqlx::query(&sql);
        for param in &params {
            insert = bind_value(insert, param);
        }
        let result = insert.execute(&self.pool).await?;

        let inserted = result.rows_affected() == records.len() as u64;
        if !inserted {
            debug!(
                batch_len = records.len(),
                "guarded insert refused: log moved past the caller's snapshot"
            );
        }
        Ok(inserted)
    }
}
