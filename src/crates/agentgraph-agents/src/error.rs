//! Errors raised by tools, the SQL layer, retrievers and agents.
//!
//! Nodes return [`GraphError`]; everything in this crate returns
//! [`AgentError`] and converts with `?` at the node boundary. A
//! [`GraphError`] wrapped in [`AgentError::Graph`] converts back unchanged,
//! so interrupts raised inside helpers still suspend the run.
//!
//! ```rust
//! use agentgraph_agents::{AgentError, Result};
//!
//! fn lookup(table: &str) -> Result<()> {
//!     Err(AgentError::InvalidInput(format!("unknown table {}", table)))
//! }
//!
//! assert!(matches!(lookup("Albums"), Err(AgentError::InvalidInput(_))));
//! ```

use agentgraph_core::GraphError;
use thiserror::Error;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in agents and their building blocks
#[derive(Error, Debug)]
pub enum AgentError {
    /// A tool ran and failed
    #[error("Tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The model called a tool nobody registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments or other input did not match what was expected
    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    /// The read-only guard refused a statement
    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Web search request or response failure
    #[error("Search error: {0}")]
    Search(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from the graph engine or a model call
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Custom(String),
}

impl AgentError {
    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

impl From<AgentError> for GraphError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Graph(inner) => inner,
            AgentError::Serialization(inner) => GraphError::Serialization(inner),
            other => GraphError::Custom(other.to_string()),
        }
    }
}

impl From<agentgraph_core::StoreError> for AgentError {
    fn from(err: agentgraph_core::StoreError) -> Self {
        AgentError::Graph(GraphError::Store(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::Interrupt;
    use serde_json::json;

    #[test]
    fn test_graph_errors_round_trip() {
        let interrupt = Interrupt::dynamic("t-0", "human_input", json!("Please provide input."));
        let err: AgentError = GraphError::NodeInterrupt(Box::new(interrupt)).into();
        let back: GraphError = err.into();
        assert!(matches!(back, GraphError::NodeInterrupt(ref i) if i.node == "human_input"));
    }

    #[test]
    fn test_other_errors_become_custom() {
        let err: GraphError = AgentError::QueryRejected("DELETE is not allowed".into()).into();
        assert_eq!(err.to_string(), "Query rejected: DELETE is not allowed");
    }
}
