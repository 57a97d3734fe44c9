//! SQL tools for a model: list tables, describe them, check and run queries

use super::SqlDatabase;
use crate::error::Result;
use crate::tools::{object_schema, str_arg, string_param, Tool, ToolContext, ToolRegistry};
use agentgraph_core::llm::ChatModel;
use agentgraph_core::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const LIST_TABLES: &str = "sql_db_list_tables";
pub const SCHEMA: &str = "sql_db_schema";
pub const QUERY: &str = "sql_db_query";
pub const QUERY_CHECKER: &str = "sql_db_query_checker";

/// System prompt of the query checker; `{dialect}` is substituted
pub const QUERY_CHECKER_PROMPT: &str = "You are a SQL expert with a strong attention to detail.
Double check the {dialect} query for common mistakes, including:
- Using NOT IN with NULL values
- Using UNION when UNION ALL should have been used
- Using BETWEEN for exclusive ranges
- Data type mismatch in predicates
- Properly quoting identifiers
- Using the correct number of arguments for functions
- Casting to the correct data type
- Using the proper columns for joins

If there are any of the above mistakes, rewrite the query. If there are no mistakes, just reproduce the original query.

Output the final SQL query only.";

/// Lists the database tables
pub struct ListTablesTool {
    db: Arc<dyn SqlDatabase>,
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        LIST_TABLES
    }

    fn description(&self) -> &str {
        "Input is an empty string, output is a comma-separated list of tables in the database."
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
        Ok(self.db.list_tables().await?.join(", "))
    }
}

/// Schema and sample rows of named tables
pub struct SchemaTool {
    db: Arc<dyn SqlDatabase>,
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        SCHEMA
    }

    fn description(&self) -> &str {
        "Input to this tool is a comma-separated list of tables, output is the schema and sample rows for those tables. \
Be sure that the tables actually exist by calling sql_db_list_tables first! Example Input: table1, table2, table3"
    }

    fn parameters(&self) -> Value {
        object_schema([(
            "table_names",
            string_param("A comma-separated list of the table names for which to return the schema. Example input: 'table1, table2, table3'"),
        )])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let tables: Vec<String> = str_arg(&args, "table_names")?
            .split(',')
            .map(|t| t.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self.db.table_info(&tables).await
    }
}

/// Runs a read-only query
///
/// Database errors are returned as text so the model can fix its query.
pub struct QueryTool {
    db: Arc<dyn SqlDatabase>,
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        QUERY
    }

    fn description(&self) -> &str {
        "Input to this tool is a detailed and correct SQL query, output is a result from the database. \
If the query is not correct, an error message will be returned. If an error is returned, rewrite the query, \
check the query, and try again. If you encounter an issue with Unknown column 'xxxx' in 'field list', \
use sql_db_schema to query the correct table fields."
    }

    fn parameters(&self) -> Value {
        object_schema([("query", string_param("A detailed and correct SQL query."))])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let sql = str_arg(&args, "query")?;
        match self.db.run(sql).await {
            Ok(result) => Ok(result.render(false)),
            Err(e) => {
                tracing::debug!(error = %e, "query failed");
                Ok(format!("Error: {}", e))
            }
        }
    }
}

/// Asks a model to double check a query before it runs
pub struct QueryCheckerTool {
    model: Arc<dyn ChatModel>,
    dialect: String,
}

impl QueryCheckerTool {
    pub fn new(model: Arc<dyn ChatModel>, dialect: impl Into<String>) -> Self {
        Self {
            model,
            dialect: dialect.into(),
        }
    }

    pub fn prompt(&self) -> String {
        QUERY_CHECKER_PROMPT.replace("{dialect}", &self.dialect)
    }
}

#[async_trait]
impl Tool for QueryCheckerTool {
    fn name(&self) -> &str {
        QUERY_CHECKER
    }

    fn description(&self) -> &str {
        "Use this tool to double check if your query is correct before executing it. \
Always use this tool before executing a query with sql_db_query!"
    }

    fn parameters(&self) -> Value {
        object_schema([("query", string_param("A detailed and SQL query to be checked."))])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let sql = str_arg(&args, "query")?;
        let reply = self
            .model
            .invoke(vec![Message::system(self.prompt()), Message::human(sql)])
            .await?;
        Ok(reply.content)
    }
}

/// The four SQL tools over one database
#[derive(Clone)]
pub struct SqlToolkit {
    db: Arc<dyn SqlDatabase>,
    model: Arc<dyn ChatModel>,
}

impl SqlToolkit {
    pub fn new(db: Arc<dyn SqlDatabase>, model: Arc<dyn ChatModel>) -> Self {
        Self { db, model }
    }

    pub fn db(&self) -> &Arc<dyn SqlDatabase> {
        &self.db
    }

    pub fn list_tables_tool(&self) -> ListTablesTool {
        ListTablesTool { db: Arc::clone(&self.db) }
    }

    pub fn schema_tool(&self) -> SchemaTool {
        SchemaTool { db: Arc::clone(&self.db) }
    }

    pub fn query_tool(&self) -> QueryTool {
        QueryTool { db: Arc::clone(&self.db) }
    }

    pub fn checker_tool(&self) -> QueryCheckerTool {
        QueryCheckerTool::new(Arc::clone(&self.model), self.db.dialect())
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![
            Arc::new(self.checker_tool()),
            Arc::new(self.query_tool()),
            Arc::new(self.schema_tool()),
            Arc::new(self.list_tables_tool()),
        ]
    }

    pub fn registry(&self) -> ToolRegistry {
        self.tools().into_iter().collect()
    }
}
