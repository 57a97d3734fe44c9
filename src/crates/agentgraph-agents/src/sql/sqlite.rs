//! SQLite backend on `sqlx`
//!
//! Database files are opened read-only. [`SqliteDatabase::from_script`]
//! builds a private in-memory database from a SQL script, which is how the
//! tests and demos get a small Chinook catalogue without a file.

use super::guard::ensure_read_only;
use super::{QueryResult, SqlDatabase};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Sqlite, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;

/// Sample rows shown under each `CREATE TABLE` in [`SqlDatabase::table_info`]
pub const DEFAULT_SAMPLE_ROWS: usize = 3;

#[derive(Clone, Debug)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    sample_rows: usize,
}

impl SqliteDatabase {
    /// Open a database file (or `sqlite:` URL) read-only
    pub async fn connect(url: &str) -> Result<Self> {
        let options = (if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)?
        } else {
            let path = Path::new(url);
            if !path.exists() {
                return Err(AgentError::InvalidInput(format!("database file {} does not exist", url)));
            }
            SqliteConnectOptions::new().filename(path)
        })
        .read_only(true);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        tracing::info!(url = %url, "opened sqlite database");
        Ok(Self::from_pool(pool))
    }

    /// In-memory database initialised by `script`
    pub async fn from_script(script: &str) -> Result<Self> {
        // one connection that never closes, or the database disappears
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        pool.execute(script).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            sample_rows: DEFAULT_SAMPLE_ROWS,
        }
    }

    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut query = sqlx::query::<Sqlite>(sql);
        for param in params {
            query = bind(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        Ok(QueryResult { columns, rows })
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind<'q>(query: SqliteQuery<'q>, param: &Value) -> SqliteQuery<'q> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Vec<Value>> {
    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            let kind = raw.type_info().name().to_ascii_uppercase();
            let value = match kind.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => Value::from(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => Value::from(format!("<{} bytes>", row.try_get_unchecked::<Vec<u8>, _>(i)?.len())),
                _ => Value::from(row.try_get_unchecked::<String, _>(i)?),
            };
            Ok(value)
        })
        .collect()
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SqlDatabase for SqliteDatabase {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn table_info(&self, tables: &[String]) -> Result<String> {
        let known = self.list_tables().await?;
        let missing: Vec<&str> = tables
            .iter()
            .map(String::as_str)
            .filter(|t| !known.iter().any(|k| k == t))
            .collect();
        if !missing.is_empty() {
            return Err(AgentError::InvalidInput(format!(
                "table_names {{{}}} not found in database",
                missing.join(", ")
            )));
        }

        let mut sections = Vec::with_capacity(tables.len());
        for table in tables {
            let (create,): (String,) =
                sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(table)
                    .fetch_one(&self.pool)
                    .await?;

            let mut section = format!("\n{}", create.trim_end());
            if self.sample_rows > 0 {
                let sample = self
                    .fetch(
                        &format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), self.sample_rows),
                        &[],
                    )
                    .await?;
                let columns: Vec<String> = if sample.columns.is_empty() {
                    column_names(&create)
                } else {
                    sample.columns.clone()
                };
                let lines: Vec<String> = sample
                    .rows
                    .iter()
                    .map(|row| row.iter().map(render_cell).collect::<Vec<_>>().join("\t"))
                    .collect();
                section.push_str(&format!(
                    "\n\n/*\n{} rows from {} table:\n{}\n{}\n*/",
                    self.sample_rows,
                    table,
                    columns.join("\t"),
                    lines.join("\n")
                ));
            }
            sections.push(section);
        }
        Ok(sections.join("\n\n"))
    }

    async fn run_with(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let statement = ensure_read_only(sql)?;
        tracing::debug!(sql = %statement, params = params.len(), "running query");
        self.fetch(statement, params).await
    }
}

/// Column names of a `CREATE TABLE` statement, for empty tables
fn column_names(create: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (create.find('('), create.rfind(')')) else {
        return Vec::new();
    };
    create[open + 1..close]
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .map(|name| name.trim_matches(|c| matches!(c, '"' | '[' | ']' | '`' | '(' | ')')).to_string())
        .filter(|name| {
            !["CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK"]
                .iter()
                .any(|k| name.eq_ignore_ascii_case(k))
                && !name.chars().all(|c| c.is_ascii_digit())
        })
        .collect()
}
