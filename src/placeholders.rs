//! Positional-placeholder rewriting shared by the composer and the SQLite
//! backend.
//!
//! Rewriting is a single token-bounded scan: each `$k` is parsed as a
//! whole number before its replacement is emitted. Naive left-to-right
//! string substitution corrupts `$1` into `$10` once a composition grows
//! past nine parameters; scanning by token makes that class of bug
//! unrepresentable. Placeholders inside single-quoted literals are left
//! untouched.

/// Rewrite every `$k` placeholder in `sql` with the text returned by
/// `replace(k)`.
pub(crate) fn rewrite(sql: &str, mut replace: impl FnMut(usize) -> String) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            continue;
        }
        if c == '$' && !in_literal && chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            match digits.parse::<usize>() {
                Ok(index) => out.push_str(&replace(index)),
                Err(_) => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
            continue;
        }
        out.push(c);
    }

    out
}

/// Highest placeholder number appearing in `sql`, or 0 if there are none.
pub(crate) fn max_placeholder(sql: &str) -> usize {
    let mut max = 0;
    rewrite(sql, |index| {
        max = max.max(index);
        format!("${index}")
    });
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(sql: &str, offset: usize) -> String {
        rewrite(sql, |index| format!("${}", index + offset))
    }

    #[test]
    fn shifts_every_placeholder() {
        assert_eq!(
            shift("SELECT * FROM events WHERE a = $1 AND b = $2", 3),
            "SELECT * FROM events WHERE a = $4 AND b = $5"
        );
    }

    #[test]
    fn zero_offset_is_identity() {
        let sql = "SELECT $1, $2, $3";
        assert_eq!(shift(sql, 0), sql);
    }

    #[test]
    fn double_digit_placeholders_are_single_tokens() {
        // The classic corruption: substituting "$1" textually would also
        // rewrite the prefix of "$10" and "$12".
        assert_eq!(shift("$10 = $1 AND $12 = $2", 1), "$11 = $2 AND $13 = $3");
    }

    #[test]
    fn literals_are_untouched() {
        assert_eq!(
            shift("WHERE note = 'costs $100' AND id = $1", 5),
            "WHERE note = 'costs $100' AND id = $6"
        );
    }

    #[test]
    fn escaped_quote_inside_literal() {
        assert_eq!(
            shift("WHERE note = 'it''s $1 worth' AND id = $1", 1),
            "WHERE note = 'it''s $1 worth' AND id = $2"
        );
    }

    #[test]
    fn bare_dollar_is_not_a_placeholder() {
        assert_eq!(shift("SELECT '$', x$y, $1", 1), "SELECT '$', x$y, $2");
    }

    #[test]
    fn rewrites_to_sqlite_form() {
        assert_eq!(
            rewrite("a = $1 AND b = $2", |index| format!("?{index}")),
            "a = ?1 AND b = ?2"
        );
    }

    #[test]
    fn max_placeholder_finds_highest() {
        assert_eq!(max_placeholder("$2 $10 $1"), 10);
        assert_eq!(max_placeholder("no placeholders"), 0);
    }
}
