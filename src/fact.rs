//! Facts: caller-authored projections over the event log.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter backing [`FactId::next`]. Uniqueness is only
/// required within a single composition, so a plain counter is enough.
static NEXT_FACT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier tagging each row of a composed query with the fact whose
/// predicate it satisfied. Assigned by the crate, never by callers --
/// a collision would silently misroute events to the wrong reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactId(u64);

impl FactId {
    fn next() -> Self {
        Self(NEXT_FACT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// A bound parameter value, owned and backend-neutral so compositions can
/// flatten parameter lists without borrowing driver types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Null,
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// One derived piece of read state: a parameterized query over the event
/// log plus a pure fold from matched events into the command's context.
///
/// The SQL must select `sequence_number`, `event_type`, and `payload`
/// columns and number its placeholders `$1..$n` to match `params`. Facts
/// are created fresh for each command attempt and discarded afterwards.
pub struct Fact<Context, Event> {
    id: FactId,
    sql: String,
    params: Vec<SqlValue>,
    apply: Box<dyn Fn(Context, Vec<Event>) -> Context + Send + Sync>,
}

impl<Context, Event> Fact<Context, Event> {
    pub fn new(
        sql: impl Into<String>,
        params: Vec<SqlValue>,
        apply: impl Fn(Context, Vec<Event>) -> Context + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: FactId::next(),
            sql: sql.into(),
            params,
            apply: Box::new(apply),
        }
    }

    pub fn id(&self) -> FactId {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Fold this fact's matched events (ascending sequence order) into the
    /// context.
    pub fn apply_events(&self, context: Context, events: Vec<Event>) -> Context {
        (self.apply)(context, events)
    }
}

impl<Context, Event> fmt::Debug for Fact<Context, Event> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fact")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
