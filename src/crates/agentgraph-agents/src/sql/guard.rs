//! Read-only statement guard
//!
//! Queries written by a model run against a real database, so the access
//! layer accepts exactly one `SELECT` (or `WITH ... SELECT`) statement and
//! refuses everything else before it reaches the driver. String literals,
//! quoted identifiers and comments are masked first, so
//! `WHERE Name = 'Delete Me'` passes while `SELECT 1; DROP TABLE x` does not.

use crate::error::{AgentError, Result};
use regex::Regex;
use std::sync::LazyLock;

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX|TRUNCATE|GRANT|REVOKE|REPLACE\s+INTO)\b",
    )
    .unwrap()
});

static LEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*\(*\s*(SELECT|WITH)\b").unwrap());

/// Accept a single read-only statement
///
/// Returns the statement trimmed and without its trailing semicolon.
pub fn ensure_read_only(sql: &str) -> Result<&str> {
    let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if statement.is_empty() {
        return Err(AgentError::QueryRejected("empty statement".to_string()));
    }

    let masked = mask(statement)?;
    if masked.contains(';') {
        return Err(AgentError::QueryRejected("multiple statements are not allowed".to_string()));
    }
    if let Some(found) = FORBIDDEN.find(&masked) {
        let keyword = found.as_str().split_whitespace().next().unwrap_or_default();
        return Err(AgentError::QueryRejected(format!(
            "{} is not allowed",
            keyword.to_ascii_uppercase()
        )));
    }
    if !LEADING.is_match(&masked) {
        return Err(AgentError::QueryRejected(
            "only SELECT statements are allowed".to_string(),
        ));
    }
    Ok(statement)
}

/// Blank out literals, quoted identifiers and comments
fn mask(sql: &str) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let mut closed = false;
                while let Some(next) = chars.next() {
                    if next == c {
                        // doubled quote is an escaped quote
                        if chars.peek() == Some(&c) {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(AgentError::QueryRejected("unterminated quoted text".to_string()));
                }
                out.push_str(" _ ");
            }
            '[' => {
                if !chars.by_ref().any(|next| next == ']') {
                    return Err(AgentError::QueryRejected("unterminated identifier".to_string()));
                }
                out.push_str(" _ ");
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                let mut closed = false;
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        closed = true;
                        break;
                    }
                    previous = next;
                }
                if !closed {
                    return Err(AgentError::QueryRejected("unterminated comment".to_string()));
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_selects() {
        assert_eq!(ensure_read_only("SELECT * FROM Artist LIMIT 5;").unwrap(), "SELECT * FROM Artist LIMIT 5");
        assert!(ensure_read_only("  select Name from Genre").is_ok());
        assert!(ensure_read_only("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());
        assert!(ensure_read_only("(SELECT 1) UNION (SELECT 2)").is_ok());
        assert!(ensure_read_only("SELECT replace(Name, 'a', 'b') FROM Track").is_ok());
    }

    #[test]
    fn test_keywords_inside_literals_are_fine() {
        assert!(ensure_read_only("SELECT * FROM Track WHERE Name = 'Delete; Drop Table'").is_ok());
        assert!(ensure_read_only("SELECT \"Update\" FROM t -- delete everything\n").is_ok());
        assert!(ensure_read_only("SELECT 'it''s' /* DROP */").is_ok());
    }

    #[test]
    fn test_rejects_writes() {
        for sql in [
            "DELETE FROM Customer",
            "INSERT INTO Genre VALUES (99, 'x')",
            "UPDATE Track SET Name = 'x'",
            "DROP TABLE Artist",
            "PRAGMA table_info(Artist)",
            "ATTACH DATABASE 'x.db' AS x",
            "WITH gone AS (SELECT 1) DELETE FROM Artist",
            "SELECT 1; DROP TABLE Artist",
            "SELECT 1; SELECT 2",
            "REPLACE INTO Genre VALUES (1, 'x')",
            "",
            ";",
        ] {
            assert!(
                matches!(ensure_read_only(sql), Err(AgentError::QueryRejected(_))),
                "accepted {:?}",
                sql
            );
        }
    }

    #[test]
    fn test_rejection_names_keyword() {
        let err = ensure_read_only("WITH x AS (SELECT 1) delete from Artist").unwrap_err();
        assert_eq!(err.to_string(), "Query rejected: DELETE is not allowed");

        let err = ensure_read_only("DROP TABLE Genre").unwrap_err();
        assert_eq!(err.to_string(), "Query rejected: DROP is not allowed");

        let err = ensure_read_only("EXPLAIN SELECT 1").unwrap_err();
        assert_eq!(err.to_string(), "Query rejected: only SELECT statements are allowed");
    }

    #[test]
    fn test_unterminated_input() {
        assert!(ensure_read_only("SELECT 'open").is_err());
        assert!(ensure_read_only("SELECT 1 /* open").is_err());
    }

    proptest! {
        #[test]
        fn prop_appended_write_is_rejected(
            keyword in prop::sample::select(vec!["DELETE FROM t", "DROP TABLE t", "INSERT INTO t VALUES (1)", "UPDATE t SET a = 1"]),
            column in "[a-z]{1,8}",
        ) {
            let sql = format!("SELECT {} FROM t; {}", column, keyword);
            prop_assert!(ensure_read_only(&sql).is_err());
        }

        #[test]
        fn prop_literal_content_never_matters(text in "[A-Za-z ;]{0,30}") {
            let sql = format!("SELECT * FROM Track WHERE Name = '{}'", text);
            prop_assert!(ensure_read_only(&sql).is_ok());
        }
    }
}
