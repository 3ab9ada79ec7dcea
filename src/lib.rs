//! Fact-composition event sourcing over a single append-only log.
//!
//! # Why this exists
//!
//! Event-sourced features keep re-deriving the same kind of read state:
//! "does ticket T-1 exist", "which agent holds it", "how many are open".
//! Hand-writing one SQL query, one loop, and one ad-hoc version check per
//! feature produces N round trips per command and N slightly different
//! concurrency bugs. This crate turns each derived piece of state into a
//! [`Fact`] -- a parameterized query over the log plus a pure fold -- and
//! makes three guarantees:
//!
//! - **One round trip per load**: any number of independently authored
//!   facts are merged by [`compose`] into a single statement, with their
//!   positional placeholders renumbered so no fact can read another's
//!   parameters.
//! - **Optimistic concurrency without locks**: [`append`] persists a batch
//!   of events only if no event matching the command's facts has appeared
//!   since the snapshot it loaded, using the log's global sequence number
//!   as the version token. The check and the insert are one atomic
//!   statement at the storage layer.
//! - **Invisible retries**: [`execute`] reloads everything from scratch on
//!   a conflict and re-runs the (pure) command logic. Callers only ever see
//!   accepted, rejected, or failed -- never which attempt won.
//!
//! # Flow
//!
//! ```text
//! handler.facts() --compose(Read)--> store --build_context--> Context
//!        |                                                       |
//!        |                                              handler.handle()
//!        |                                                       |
//!        +-----compose(ConsistencyCheck)--> guarded insert <-- events
//!                                             |        |
//!                                          Success   Conflict -> retry
//! ```
//!
//! # Boundaries
//!
//! Domain event encodings stay outside the crate behind [`EventCodec`];
//! storage stays behind [`EventStore`], with [`SqliteStore`] as the shipped
//! backend. Connection lifecycle, supervision, and predicate-building
//! helpers are the caller's business.

mod append;
mod compose;
mod context;
mod error;
mod executor;
mod fact;
mod placeholders;
mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use append::{append, AppendOutcome};
pub use compose::{compose, ComposeMode, ComposedQuery};
pub use context::{build_context, load_context, Snapshot};
pub use error::{CodecError, EngineError, StorageError};
pub use executor::{execute, CommandHandler, CommandResult, DEFAULT_RETRY_BUDGET};
pub use fact::{Fact, FactId, SqlValue};
pub use store::{AppendGuard, EventRecord, EventStore, SqliteStore, TaggedEventRow};

/// An event serialized for storage: a type tag for dispatch plus an opaque
/// JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Translates between domain events and their stored representation.
///
/// Implementations are expected to dispatch on the type tag from a fixed
/// table of known tags and return [`CodecError::UnknownEventType`] for
/// anything else -- never silently drop a row.
pub trait EventCodec<Event>: Send + Sync {
    fn encode(&self, event: &Event) -> Result<EncodedEvent, CodecError>;

    fn decode(&self, event_type: &str, payload: &serde_json::Value)
        -> Result<Event, CodecError>;
}
