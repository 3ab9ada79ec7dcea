//! Merging an ordered list of facts into one SQL statement.
//!
//! Each fact's query runs unchanged inside its own CTE; the composer only
//! tags rows with the owning fact's id and renumbers placeholders so fact
//! *i* reads exactly its own slice of the flattened parameter list. The
//! `all_events` union is then finished in one of two shapes: a full tagged
//! read, or a max-sequence-only consistency check that fetches no payloads.

use crate::fact::{Fact, SqlValue};
use crate::placeholders;

/// The two shapes a composition can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeMode {
    /// Fetch every matched row, tagged with its fact id, plus the global
    /// `max_sequence_number` freshness snapshot.
    Read,
    /// Fetch only `max_sequence_number` -- the append-time guard needs the
    /// version, not the events.
    ConsistencyCheck,
}

/// A composed statement ready for execution: SQL with `$1..$n`
/// placeholders and the matching flattened parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Merge `facts` into a single statement in the given mode.
///
/// An empty fact list composes to a well-formed query that yields zero
/// rows; callers are free to skip the round trip instead, but composing
/// never fails.
pub fn compose<Context, Event>(
    facts: &[Fact<Context, Event>],
    mode: ComposeMode,
) -> ComposedQuery {
    if facts.is_empty() {
        let sql = match mode {
            ComposeMode::Read => {
                "SELECT NULL AS fact_id, NULL AS sequence_number, NULL AS event_type, \
                 NULL AS payload, NULL AS max_sequence_number WHERE 0"
            }
            ComposeMode::ConsistencyCheck => "SELECT NULL AS max_sequence_number WHERE 0",
        };
        return ComposedQuery {
            sql: sql.to_string(),
            params: vec![],
        };
    }

    let (head, params) = assemble_all_events(facts);

    let sql = match mode {
        ComposeMode::Read => format!(
            "{head}\n\
             SELECT all_events.*, MAX(sequence_number) OVER () AS max_sequence_number \
             FROM all_events ORDER BY sequence_number ASC",
        ),
        ComposeMode::ConsistencyCheck => format!(
            "{head}\n\
             SELECT MAX(sequence_number) AS max_sequence_number FROM all_events",
        ),
    };

    ComposedQuery { sql, params }
}

/// Scalar composition counting how many matched events lie past
/// `last_seen_sequence`. Only used to fill a conflict report after a
/// refused insert; no payloads are fetched.
pub(crate) fn compose_conflict_count<Context, Event>(
    facts: &[Fact<Context, Event>],
    last_seen_sequence: i64,
) -> ComposedQuery {
    if facts.is_empty() {
        return ComposedQuery {
            sql: "SELECT 0 AS matched_count".to_string(),
            params: vec![],
        };
    }

    let (head, mut params) = assemble_all_events(facts);
    let boundary_index = params.len() + 1;
    params.push(SqlValue::Integer(last_seen_sequence));

    ComposedQuery {
        sql: format!(
            "{head}\n\
             SELECT COUNT(*) AS matched_count FROM all_events \
             WHERE sequence_number > ${boundary_index}",
        ),
        params,
    }
}

/// The shared `WITH fact_1 AS (...), ..., all_events AS (...)` prefix and
/// the flattened parameter list behind it. Callers guarantee `facts` is
/// non-empty.
fn assemble_all_events<Context, Event>(
    facts: &[Fact<Context, Event>],
) -> (String, Vec<SqlValue>) {
    debug_assert_unique_ids(facts);

    let mut ctes = Vec::with_capacity(facts.len());
    let mut params: Vec<SqlValue> = vec![];

    for (index, fact) in facts.iter().enumerate() {
        debug_assert!(
            placeholders::max_placeholder(fact.sql()) <= fact.params().len(),
            "fact {} references ${} but binds only {} params",
            fact.id(),
            placeholders::max_placeholder(fact.sql()),
            fact.params().len(),
        );

        let offset = params.len();
        let shifted = placeholders::rewrite(fact.sql(), |k| format!("${}", k + offset));
        ctes.push(format!(
            "fact_{} AS (SELECT '{}' AS fact_id, user_query.* FROM ({}) AS user_query)",
            index + 1,
            fact.id(),
            shifted,
        ));
        params.extend(fact.params().iter().cloned());
    }

    let branches: Vec<String> = (1..=facts.len())
        .map(|n| format!("SELECT * FROM fact_{n}"))
        .collect();

    let head = format!(
        "WITH {},\nall_events AS ({})",
        ctes.join(",\n"),
        branches.join(" UNION ALL "),
    );

    (head, params)
}

fn debug_assert_unique_ids<Context, Event>(facts: &[Fact<Context, Event>]) {
    #[cfg(debug_assertions)]
    {
        let mut seen = std::collections::HashSet::new();
        for fact in facts {
            assert!(
                seen.insert(fact.id()),
                "duplicate fact id {} in composition",
                fact.id()
            );
        }
    }
    #[cfg(not(debug_assertions))]
    let _ = facts;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(sql: &str, params: Vec<SqlValue>) -> Fact<(), ()> {
        Fact::new(sql, params, |context, _| context)
    }

    #[test]
    fn single_fact_read_composition() {
        let f = fact(
            "SELECT sequence_number, event_type, payload FROM events WHERE event_type = $1",
            vec!["Opened".into()],
        );

        let query = compose(std::slice::from_ref(&f), ComposeMode::Read);

        let expected = format!(
            "WITH fact_1 AS (SELECT '{id}' AS fact_id, user_query.* FROM \
             (SELECT sequence_number, event_type, payload FROM events WHERE event_type = $1) \
             AS user_query),\n\
             all_events AS (SELECT * FROM fact_1)\n\
             SELECT all_events.*, MAX(sequence_number) OVER () AS max_sequence_number \
             FROM all_events ORDER BY sequence_number ASC",
            id = f.id(),
        );
        assert_eq!(query.sql, expected);
        assert_eq!(query.params, vec![SqlValue::Text("Opened".to_string())]);
    }

    #[test]
    fn offsets_accumulate_across_facts() {
        // Parameter counts [0, 1, 3]: fact 2's $1 lands at position 2,
        // fact 3's $1..$3 at positions 2..4 of the flattened list.
        let a = fact(
            "SELECT sequence_number, event_type, payload FROM events",
            vec![],
        );
        let b = fact(
            "SELECT sequence_number, event_type, payload FROM events WHERE event_type = $1",
            vec!["Opened".into()],
        );
        let c = fact(
            "SELECT sequence_number, event_type, payload FROM events \
             WHERE event_type = $1 AND json_extract(payload, '$.id') = $2 AND $3",
            vec!["Assigned".into(), "T-1".into(), true.into()],
        );
        let facts = vec![a, b, c];

        let query = compose(&facts, ComposeMode::Read);

        assert_eq!(query.params.len(), 4);
        assert_eq!(
            query.params,
            vec![
                SqlValue::Text("Opened".to_string()),
                SqlValue::Text("Assigned".to_string()),
                SqlValue::Text("T-1".to_string()),
                SqlValue::Boolean(true),
            ]
        );
        assert!(query.sql.contains("WHERE event_type = $1) AS user_query"));
        assert!(query
            .sql
            .contains("WHERE event_type = $2 AND json_extract(payload, '$.id') = $3 AND $4"));
        // The JSON path literal is not a placeholder.
        assert!(query.sql.contains("'$.id'"));
    }

    #[test]
    fn subquery_placeholders_are_renumbered_too() {
        let a = fact(
            "SELECT sequence_number, event_type, payload FROM events WHERE event_type = $1",
            vec!["Opened".into()],
        );
        let b = fact(
            "SELECT sequence_number, event_type, payload FROM events \
             WHERE event_type = $1 AND sequence_number IN \
             (SELECT sequence_number FROM events WHERE json_extract(payload, '$.parent') = $2)",
            vec!["ChildAdded".into(), "T-1".into()],
        );
        let facts = vec![a, b];

        let query = compose(&facts, ComposeMode::Read);

        assert!(query.sql.contains("WHERE event_type = $2 AND sequence_number IN"));
        assert!(query
            .sql
            .contains("WHERE json_extract(payload, '$.parent') = $3)"));
    }

    #[test]
    fn double_digit_renumbering_does_not_corrupt_low_placeholders() {
        // Nine params in the first fact push the second fact into the
        // double-digit range, where textual substitution used to corrupt
        // $1 into $10.
        let wide_sql = "SELECT sequence_number, event_type, payload FROM events \
                        WHERE event_type IN ($1, $2, $3, $4, $5, $6, $7, $8, $9)";
        let wide_params: Vec<SqlValue> =
            (1..=9).map(|n| SqlValue::Integer(n)).collect();
        let a = fact(wide_sql, wide_params);
        let b = fact(
            "SELECT sequence_number, event_type, payload FROM events \
             WHERE event_type = $1 AND json_extract(payload, '$.id') = $2",
            vec!["Closed".into(), "T-1".into()],
        );
        let facts = vec![a, b];

        let query = compose(&facts, ComposeMode::Read);

        assert!(query
            .sql
            .contains("WHERE event_type = $10 AND json_extract(payload, '$.id') = $11"));
        assert!(query.sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9)"));
        assert_eq!(query.params.len(), 11);
    }

    #[test]
    fn consistency_check_selects_only_max_sequence() {
        let f = fact(
            "SELECT sequence_number, event_type, payload FROM events WHERE event_type = $1",
            vec!["Opened".into()],
        );

        let facts = vec![f];
        let query = compose(&facts, ComposeMode::ConsistencyCheck);

        assert!(query.sql.ends_with(
            "SELECT MAX(sequence_number) AS max_sequence_number FROM all_events"
        ));
        assert!(!query.sql.contains("OVER ()"));
        assert!(!query.sql.contains("ORDER BY"));
    }

    #[test]
    fn conflict_count_appends_boundary_after_fact_params() {
        let f = fact(
            "SELECT sequence_number, event_type, payload FROM events WHERE event_type = $1",
            vec!["Opened".into()],
        );

        let facts = vec![f];
        let query = compose_conflict_count(&facts, 7);

        assert!(query.sql.ends_with(
            "SELECT COUNT(*) AS matched_count FROM all_events WHERE sequence_number > $2"
        ));
        assert_eq!(
            query.params,
            vec![
                SqlValue::Text("Opened".to_string()),
                SqlValue::Integer(7),
            ]
        );
        assert!(!query.sql.contains("OVER ()"));
        assert!(!query.sql.contains("ORDER BY"));
    }

    #[test]
    fn empty_fact_list_composes_zero_row_queries() {
        let facts: Vec<Fact<(), ()>> = vec![];

        let read = compose(&facts, ComposeMode::Read);
        let check = compose(&facts, ComposeMode::ConsistencyCheck);

        assert!(read.params.is_empty());
        assert!(read.sql.contains("WHERE 0"));
        assert!(check.sql.contains("WHERE 0"));
    }
}
