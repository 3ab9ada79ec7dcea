//! Turning tagged rows back into a command's context.

use std::collections::HashMap;

use crate::compose::{compose, ComposeMode};
use crate::error::{CodecError, EngineError};
use crate::fact::Fact;
use crate::store::{EventStore, TaggedEventRow};
use crate::EventCodec;

/// A fully built context plus the freshness boundary it was built from.
///
/// `last_seen_sequence` is the global maximum sequence among every row the
/// read composition matched, and is what [`crate::append`] later compares
/// against. For staged ("two-step") loads, run [`load_context`] once per
/// stage and append against the larger of the two sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<Context> {
    pub context: Context,
    pub last_seen_sequence: i64,
}

/// Decode rows, group them by originating fact, and fold each fact's
/// reducer over its own rows.
///
/// Rows arrive already in ascending sequence order (the read composition
/// orders them), and grouping preserves that order. Facts fold in their
/// original list order; a fact with no matching rows folds over an empty
/// list. The first decode failure aborts the whole build -- a context
/// missing events is worse than no context.
pub fn build_context<Context, Event>(
    rows: &[TaggedEventRow],
    facts: &[Fact<Context, Event>],
    codec: &impl EventCodec<Event>,
    initial: Context,
) -> Result<Context, CodecError> {
    let mut grouped: HashMap<String, Vec<Event>> = HashMap::new();
    for row in rows {
        let event = codec.decode(&row.event_type, &row.payload)?;
        grouped.entry(row.fact_id.clone()).or_default().push(event);
    }

    let mut context = initial;
    for fact in facts {
        let events = grouped.remove(&fact.id().to_string()).unwrap_or_default();
        context = fact.apply_events(context, events);
    }
    Ok(context)
}

/// Execute the full load pipeline: compose a read, fetch, build.
///
/// Always a complete re-read -- never incremental -- so the returned
/// context is provably consistent with its own `last_seen_sequence`. An
/// empty fact list skips the round trip entirely.
pub async fn load_context<Context, Event>(
    store: &impl EventStore,
    codec: &impl EventCodec<Event>,
    facts: &[Fact<Context, Event>],
    initial: Context,
) -> Result<Snapshot<Context>, EngineError> {
    if facts.is_empty() {
        return Ok(Snapshot {
            context: initial,
            last_seen_sequence: 0,
        });
    }

    let query = compose(facts, ComposeMode::Read);
    let rows = store.fetch(&query).await?;
    let last_seen_sequence = rows.first().map_or(0, |row| row.max_sequence_number);
    let context = build_context(&rows, facts, codec, initial).map_err(EngineError::Decode)?;

    Ok(Snapshot {
        context,
        last_seen_sequence,
    })
}
