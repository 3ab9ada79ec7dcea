//! Appending a batch of events behind an optimistic-concurrency guard.

use tracing::debug;

use crate::compose::{compose, compose_conflict_count, ComposeMode};
use crate::error::EngineError;
use crate::fact::Fact;
use crate::store::{AppendGuard, EventRecord, EventStore};
use crate::EventCodec;

/// The outcome of an append attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The whole batch was persisted.
    Success,
    /// The log moved past the caller's snapshot; nothing was persisted.
    /// `matched_count` is how many events matching the consistency facts
    /// appeared after `last_seen_sequence`.
    Conflict { matched_count: usize },
}

/// Encode `events` and insert them iff no event matching
/// `consistency_facts` has appeared since `last_seen_sequence`.
///
/// The batch is atomic: a conflict withholds every event, including ones
/// unrelated to the conflicting fact. An empty `consistency_facts` list
/// means "no constraint" and inserts unconditionally; an empty batch is
/// vacuously successful and performs no round trip.
pub async fn append<Context, Event>(
    store: &impl EventStore,
    codec: &impl EventCodec<Event>,
    events: &[Event],
    metadata: &serde_json::Value,
    consistency_facts: &[Fact<Context, Event>],
    last_seen_sequence: i64,
) -> Result<AppendOutcome, EngineError> {
    if events.is_empty() {
        return Ok(AppendOutcome::Success);
    }

    let records = events
        .iter()
        .map(|event| {
            let encoded = codec.encode(event).map_err(EngineError::Encode)?;
            Ok(EventRecord {
                event_type: encoded.event_type,
                payload: encoded.payload,
                metadata: metadata.clone(),
            })
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    let guard = if consistency_facts.is_empty() {
        None
    } else {
        Some(AppendGuard {
            check: compose(consistency_facts, ComposeMode::ConsistencyCheck),
            last_seen_sequence,
        })
    };

    if store.append_batch(&records, guard.as_ref()).await? {
        return Ok(AppendOutcome::Success);
    }

    // Refused: fill the conflict report with a scalar count of what
    // appeared past the snapshot. No payloads are fetched, and the count
    // is informational only -- the refusal itself was atomic.
    let count = compose_conflict_count(consistency_facts, last_seen_sequence);
    let matched_count = usize::try_from(store.fetch_count(&count).await?).unwrap_or_default();
    debug!(matched_count, last_seen_sequence, "append conflicted");

    Ok(AppendOutcome::Conflict { matched_count })
}
