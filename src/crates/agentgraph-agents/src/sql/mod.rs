//! Read-only SQL access for agents
//!
//! ```text
//!   model-written SQL ──▶ guard::ensure_read_only ──▶ SqlDatabase::run ──▶ QueryResult::render
//! ```
//!
//! [`SqlDatabase`] is what the SQL agent and the music-store tools see.
//! [`SqliteDatabase`] implements it on `sqlx`, opening database files
//! read-only; the guard refuses anything but a single `SELECT`/`WITH`
//! statement regardless of the backend.
//!
//! Results are rendered the way models have learned to read them: a list
//! of tuples, or a list of `{column: value}` records when column names
//! matter.

pub mod guard;
pub mod sqlite;
pub mod toolkit;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use guard::ensure_read_only;
pub use sqlite::SqliteDatabase;
pub use toolkit::{QueryCheckerTool, SqlToolkit, QUERY_CHECKER_PROMPT};

#[async_trait]
pub trait SqlDatabase: Send + Sync {
    /// Dialect name used in prompts, e.g. `sqlite`
    fn dialect(&self) -> &str;

    /// Usable table names, sorted
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// `CREATE TABLE` statements and sample rows for `tables`
    async fn table_info(&self, tables: &[String]) -> Result<String>;

    /// Run a read-only query
    async fn run(&self, sql: &str) -> Result<QueryResult> {
        self.run_with(sql, &[]).await
    }

    /// Run a read-only query with positional `?` parameters
    async fn run_with(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;
}

/// Rows returned by a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as `{column: value}` objects
    pub fn records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }

    /// `[(1, 'AC/DC'), ..]`, or `[{'ArtistId': 1, 'Name': 'AC/DC'}, ..]`
    /// with `include_columns`; an empty result renders as an empty string
    pub fn render(&self, include_columns: bool) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| {
                if include_columns {
                    let fields: Vec<String> = self
                        .columns
                        .iter()
                        .zip(row)
                        .map(|(column, value)| format!("{}: {}", quote(column), literal(value)))
                        .collect();
                    format!("{{{}}}", fields.join(", "))
                } else {
                    let values: Vec<String> = row.iter().map(literal).collect();
                    if values.len() == 1 {
                        format!("({},)", values[0])
                    } else {
                        format!("({})", values.join(", "))
                    }
                }
            })
            .collect();
        format!("[{}]", rows.join(", "))
    }
}

fn quote(text: &str) -> String {
    if text.contains('\'') && !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result() -> QueryResult {
        QueryResult {
            columns: vec!["ArtistId".into(), "Name".into(), "Price".into()],
            rows: vec![
                vec![json!(1), json!("AC/DC"), json!(0.99)],
                vec![json!(2), json!("Guns N' Roses"), Value::Null],
            ],
        }
    }

    #[test]
    fn test_render_tuples() {
        assert_eq!(
            result().render(false),
            "[(1, 'AC/DC', 0.99), (2, \"Guns N' Roses\", None)]"
        );
        let single = QueryResult {
            columns: vec!["n".into()],
            rows: vec![vec![json!(347)]],
        };
        assert_eq!(single.render(false), "[(347,)]");
    }

    #[test]
    fn test_render_records() {
        assert_eq!(
            result().render(true),
            "[{'ArtistId': 1, 'Name': 'AC/DC', 'Price': 0.99}, {'ArtistId': 2, 'Name': \"Guns N' Roses\", 'Price': None}]"
        );
        assert_eq!(result().records()[0]["Name"], "AC/DC");
    }

    #[test]
    fn test_empty_renders_empty() {
        assert_eq!(QueryResult::default().render(true), "");
    }
}
