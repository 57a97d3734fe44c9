//! SQL question answering with a fixed workflow
//!
//! ```text
//!   START ─▶ list_tables ─▶ call_get_schema ─▶ get_schema ─▶ generate_query ──(no query)──▶ END
//!                                                                ▲     │
//!                                                                │   query
//!                                                                │     ▼
//!                                                          run_query ◀─ check_query
//! ```
//!
//! Listing the tables is not left to the model: `list_tables` fabricates
//! the tool call and its answer. The model is then forced to ask for the
//! schemas it needs, writes a query, and every query is double checked by
//! a second call before it runs. The loop ends when the model answers
//! without a tool call.
//!
//! `loaded_memory` carries saved user preferences into the query prompt;
//! the music store fills it in.

use crate::sql::toolkit::LIST_TABLES;
use crate::sql::{SqlDatabase, SqlToolkit};
use crate::tool_node::ToolNode;
use crate::tools::{Tool, ToolContext};
use agentgraph_core::llm::{ChatModel, ChatRequest, ToolCall, ToolChoice};
use agentgraph_core::messages::last_message;
use agentgraph_core::state::{AddMessages, Overwrite};
use agentgraph_core::{graph_state, CompileOptions, CompiledGraph, Message, NodeContext, Result, StateGraph, END, START};
use serde_json::json;
use std::sync::Arc;

const LIST_TABLES_CALL_ID: &str = "list_tables_call";

const GENERATE_QUERY_PROMPT: &str = "You are an agent designed to interact with a SQL database.
Given the table schemas you've seen and the user's question, create a syntactically correct {dialect} query.

Important rules:
- Limit results to at most 5 unless specified otherwise
- Only select relevant columns, not all columns
- Order by relevant columns to get interesting results
- DO NOT make any DML statements (INSERT, UPDATE, DELETE, DROP etc.)
- If getting song recommendations return the song, artist, and album name for each song.

Example of how to write {dialect} queries:
SELECT t.Name as Song, ar.Name as Artist, al.Title as Album
FROM Track t
JOIN Genre g ON t.GenreId = g.GenreId
JOIN Album al ON t.AlbumId = al.AlbumId
JOIN Artist ar ON al.ArtistId = ar.ArtistId
WHERE g.Name = 'Rock'
ORDER BY ar.Name, al.Title
LIMIT 5

Return the response in a nice format for the user to read.

Additional context is provided below:

Prior saved user preferences: {memory}

Message history is also attached.";

const CHECK_QUERY_PROMPT: &str = "You are a SQL expert. Double check this {dialect} query for common mistakes:
- Using NOT IN with NULL values
- Using UNION when UNION ALL should be used
- Using BETWEEN for exclusive ranges
- Data type mismatches
- Proper column names for joins
- Correct function arguments

If there are mistakes, rewrite the query. Otherwise, reproduce the original query.
You will call sql_db_query to execute the query after this check.";

graph_state! {
    pub struct SqlAgentState (SqlAgentUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub loaded_memory: Option<String> => Overwrite,
    }
}

/// Builder for the SQL agent graph
pub struct SqlAgent {
    model: Arc<dyn ChatModel>,
    toolkit: SqlToolkit,
    options: CompileOptions,
}

impl SqlAgent {
    pub fn new(model: Arc<dyn ChatModel>, db: Arc<dyn SqlDatabase>) -> Self {
        let toolkit = SqlToolkit::new(db, Arc::clone(&model));
        Self {
            model,
            toolkit,
            options: CompileOptions::new().with_name("sql_agent"),
        }
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<CompiledGraph<SqlAgentState>> {
        let model = self.model;
        let dialect = self.toolkit.db().dialect().to_string();
        let list_tables_tool = Arc::new(self.toolkit.list_tables_tool());
        let schema_node = ToolNode::from_tools([Arc::new(self.toolkit.schema_tool()) as Arc<dyn Tool>]);
        let query_node = ToolNode::from_tools([Arc::new(self.toolkit.query_tool()) as Arc<dyn Tool>]);
        let schema_defs = schema_node.registry().definitions();
        let query_defs = query_node.registry().definitions();

        let mut graph = StateGraph::<SqlAgentState>::new();

        graph.add_node("list_tables", move |_state: SqlAgentState, _ctx: NodeContext| {
            let tool = Arc::clone(&list_tables_tool);
            async move {
                let call = ToolCall::new(LIST_TABLES_CALL_ID, LIST_TABLES, json!({}));
                let tables = tool.execute(json!({}), &ToolContext::new()).await?;
                tracing::debug!(%tables, "listed tables");
                Ok(SqlAgentUpdate::default().messages(vec![
                    Message::ai("").with_tool_calls(vec![call]),
                    Message::tool(tables.clone(), LIST_TABLES_CALL_ID).with_name(LIST_TABLES),
                    Message::ai(format!("I found these tables in the database: {}", tables)),
                ]))
            }
        });

        let schema_model = Arc::clone(&model);
        graph.add_node("call_get_schema", move |state: SqlAgentState, _ctx: NodeContext| {
            let model = Arc::clone(&schema_model);
            let definitions = schema_defs.clone();
            async move {
                let question = state.messages.first().map(|m| m.content.clone()).unwrap_or_default();
                let prompt = format!(
                    "Based on this question: '{}'\n and these available tables from the database,\n \
decide which table schemas you need to see to answer the question.\n \
Call the sql_db_schema tool with the relevant table names.",
                    question
                );
                let mut messages = state.messages;
                messages.push(Message::human(prompt));
                let request = ChatRequest::new(messages)
                    .with_tools(definitions)
                    .with_tool_choice(ToolChoice::Required);
                let reply = model.chat(request).await?.message;
                Ok(SqlAgentUpdate::default().messages(vec![reply]))
            }
        });

        graph.add_node("get_schema", move |state: SqlAgentState, _ctx: NodeContext| {
            let node = schema_node.clone();
            async move {
                let results = node.run(&state.messages, &ToolContext::new()).await?;
                Ok(SqlAgentUpdate::default().messages(results))
            }
        });

        let generate_model = Arc::clone(&model);
        let generate_defs = query_defs.clone();
        let generate_dialect = dialect.clone();
        graph.add_node("generate_query", move |state: SqlAgentState, _ctx: NodeContext| {
            let model = Arc::clone(&generate_model);
            let definitions = generate_defs.clone();
            let prompt = GENERATE_QUERY_PROMPT
                .replace("{dialect}", &generate_dialect)
                .replace("{memory}", state.loaded_memory.as_deref().unwrap_or("None"));
            async move {
                let request = ChatRequest::new(state.messages)
                    .with_system(prompt)
                    .with_tools(definitions);
                let reply = model.chat(request).await?.message;
                Ok(SqlAgentUpdate::default().messages(vec![reply]))
            }
        });

        let check_prompt = CHECK_QUERY_PROMPT.replace("{dialect}", &dialect);
        graph.add_node("check_query", move |state: SqlAgentState, _ctx: NodeContext| {
            let model = Arc::clone(&model);
            let definitions = query_defs.clone();
            let prompt = check_prompt.clone();
            async move {
                let Some(last) = last_message(&state.messages) else {
                    return Ok(SqlAgentUpdate::default());
                };
                let Some(call) = last.tool_calls.first() else {
                    return Ok(SqlAgentUpdate::default());
                };
                let query = call.str_arg("query").unwrap_or_default();
                let request = ChatRequest::new(vec![
                    Message::system(prompt),
                    Message::human(format!("Check this query: {}", query)),
                ])
                .with_tools(definitions)
                .with_tool_choice(ToolChoice::Required);
                let mut reply = model.chat(request).await?.message;
                // replaces the unchecked call in the history
                reply.id = last.id.clone();
                Ok(SqlAgentUpdate::default().messages(vec![reply]))
            }
        });

        graph.add_node("run_query", move |state: SqlAgentState, _ctx: NodeContext| {
            let node = query_node.clone();
            async move {
                let results = node.run(&state.messages, &ToolContext::new()).await?;
                Ok(SqlAgentUpdate::default().messages(results))
            }
        });

        graph
            .add_edge(START, "list_tables")
            .add_edge("list_tables", "call_get_schema")
            .add_edge("call_get_schema", "get_schema")
            .add_edge("get_schema", "generate_query")
            .add_conditional_edges("generate_query", route_after_query, [("check_query", "check_query"), (END, END)])
            .add_edge("check_query", "run_query")
            .add_edge("run_query", "generate_query");

        graph.compile_with(self.options)
    }
}

fn route_after_query(state: &SqlAgentState) -> &'static str {
    match last_message(&state.messages) {
        Some(last) if last.has_tool_calls() => "check_query",
        _ => END,
    }
}

/// Compile the SQL agent over `db`
pub fn create_sql_agent(model: Arc<dyn ChatModel>, db: Arc<dyn SqlDatabase>) -> Result<CompiledGraph<SqlAgentState>> {
    SqlAgent::new(model, db).build()
}

/// Final answer of a completed run
pub fn final_answer(state: &SqlAgentState) -> &str {
    last_message(&state.messages).map(|m| m.content.as_str()).unwrap_or_default()
}
