//! Error types, one enum per concern so callers can tell a refused
//! business rule from a broken database.

/// Failures at the storage layer: connectivity, SQL, migrations, or rows
/// whose stored payload is no longer valid JSON.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("stored payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Failures translating between domain events and their stored form.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The stored type tag has no registered decoder. Surfaced explicitly
    /// instead of dropping the row.
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Fatal failures of a command attempt. None of these are retried: a
/// conflict is the only condition that loops, and it never surfaces here
/// except as [`EngineError::RetriesExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to decode stored event: {0}")]
    Decode(#[source] CodecError),
    #[error("failed to encode event for append: {0}")]
    Encode(#[source] CodecError),
    #[error("max retries exceeded after {attempts} conflicting attempts")]
    RetriesExhausted { attempts: u32 },
}
