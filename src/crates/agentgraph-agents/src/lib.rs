//! # agentgraph-agents
//!
//! Building blocks and complete agents on top of `agentgraph-core`:
//!
//! - **[`tools`]**: the [`Tool`] trait, a [`ToolRegistry`] with argument
//!   validation, and [`ToolContext`] for values the model must not choose
//! - **[`tool_node`]**: a graph node executing the tool calls of the last
//!   AI message
//! - **[`sql`]**: a read-only SQL access layer over `sqlx` and the SQL
//!   toolkit for models
//! - **[`retrieval`]**: retrievers over an in-memory corpus or the store
//! - **[`search`]**: web search with a Tavily client
//! - **[`agents`]**: ReAct, SQL, RAG variants, music store support and
//!   its swarm, email triage, the deep researcher and the deep agent
//!
//! ```rust,ignore
//! use agentgraph_agents::agents::rag::create_corrective_rag;
//! use agentgraph_agents::retrieval::InMemoryRetriever;
//!
//! let retriever = InMemoryRetriever::new(load_documents("docs", 1000, 200).await?);
//! let rag = create_corrective_rag(model, Arc::new(retriever))?;
//! let state = rag.invoke(CorrectiveRagUpdate::default().question("How are threads persisted?")).await?;
//! ```

pub mod agents;
pub mod error;
pub mod retrieval;
pub mod search;
pub mod sql;
pub mod tool_node;
pub mod tools;

pub use agents::{create_react_agent, create_sql_agent};
pub use error::{AgentError, Result};
pub use retrieval::{InMemoryRetriever, Retriever, StoreRetriever};
pub use search::{TavilySearch, WebSearch, WebSearchTool};
pub use sql::{SqlDatabase, SqliteDatabase, SqlToolkit};
pub use tool_node::{tools_condition, ToolNode};
pub use tools::{execute_tool_safely, FnTool, Tool, ToolContext, ToolRegistry};
