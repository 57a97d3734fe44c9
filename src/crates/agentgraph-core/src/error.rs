//! Error types for graph construction and execution
//!
//! Every fallible operation in this crate returns [`GraphError`]. All
//! variants implement `std::error::Error` via `thiserror`.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation       - graph structure rejected at compile time
//! ├── Routing          - router returned a label it never declared
//! ├── NodeExecution    - a node failed
//! ├── Execution        - executor failure not tied to one node
//! ├── NodeInterrupt    - a node asked for human input (handled by the executor)
//! ├── Interrupted      - a run suspended and cannot continue on this path
//! ├── RecursionLimit   - too many supersteps
//! ├── RetryExhausted   - a bounded generation loop gave up
//! ├── State            - state could not be built or updated
//! ├── Checkpoint       - persistence failure
//! ├── Store            - long-term store failure
//! ├── Model            - chat model failure or unusable model output
//! ├── Serialization    - JSON failure
//! ├── Configuration    - missing or invalid configuration
//! ├── Timeout          - an operation exceeded its deadline
//! └── Custom           - application-defined
//! ```
//!
//! # Matching
//!
//! ```rust
//! use agentgraph_core::error::GraphError;
//!
//! fn describe(err: &GraphError) -> &'static str {
//!     match err {
//!         GraphError::Validation(_) => "fix the graph definition",
//!         GraphError::RetryExhausted { .. } => "answer could not be grounded",
//!         GraphError::Interrupted { .. } => "waiting for a human",
//!         _ => "unexpected failure",
//!     }
//! }
//! # let _ = describe(&GraphError::Validation("x".into()));
//! ```

use crate::interrupt::Interrupt;
use agentgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// The graph definition is invalid
    ///
    /// Raised by [`StateGraph::compile`](crate::StateGraph::compile) when an
    /// edge references an unknown node, a node name is reserved or duplicated,
    /// or no entry edge exists.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A router returned a destination it did not declare
    ///
    /// Routers are only checked when they run, so this surfaces at the first
    /// superstep that takes the offending branch.
    #[error("Node '{node}' routed to undeclared destination '{label}'")]
    Routing { node: String, label: String },

    /// A node returned an error
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Executor failure not attributable to a single node
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A node called [`NodeContext::interrupt`](crate::NodeContext::interrupt)
    ///
    /// Nodes propagate this with `?`; the executor turns it into a
    /// suspended run. It only escapes the executor when a node swallows and
    /// re-wraps it.
    #[error("Node '{}' requested human input", .0.node)]
    NodeInterrupt(Box<Interrupt>),

    /// A run is suspended on one or more interrupts
    ///
    /// Returned by [`CompiledGraph::invoke`](crate::CompiledGraph::invoke),
    /// which has no way to hand back a suspended run. Use
    /// [`CompiledGraph::invoke_with_config`](crate::CompiledGraph::invoke_with_config) to receive the
    /// interrupts as a value instead.
    #[error("Graph execution interrupted at node '{node}': {reason}")]
    Interrupted { node: String, reason: String },

    /// The run exceeded its superstep budget
    #[error("Recursion limit of {limit} reached without hitting a stop condition")]
    RecursionLimit { limit: usize },

    /// A bounded generation loop used every attempt without acceptance
    #[error("Generation rejected after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    /// State error with optional node context
    #[error("State error{}: {error}", node.as_ref().map(|n| format!(" in node '{}'", n)).unwrap_or_default())]
    State { node: Option<String>, error: String },

    /// Checkpoint persistence failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Long-term store failed
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// A chat model call failed or its output could not be used
    #[error("Model error: {0}")]
    Model(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Application-defined error
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Create a node execution error
    ///
    /// ```rust
    /// use agentgraph_core::error::GraphError;
    ///
    /// let err = GraphError::node_execution("retrieve", "vector store unavailable");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "Node 'retrieve' execution failed: vector store unavailable"
    /// );
    /// ```
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a state error, optionally tied to a node
    pub fn state_error(node: Option<impl Into<String>>, error: impl Into<String>) -> Self {
        Self::State {
            node: node.map(Into::into),
            error: error.into(),
        }
    }

    /// Create an interrupted error
    pub fn interrupted(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Interrupted {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::NodeInterrupt(_) | Self::Interrupted { .. })
    }

    /// Attach a node name to an error that lacks one
    pub(crate) fn in_node(self, node: &str) -> Self {
        match self {
            Self::Custom(error) | Self::Execution(error) => Self::node_execution(node, error),
            Self::State { node: None, error } => Self::State {
                node: Some(node.to_string()),
                error,
            },
            other => other,
        }
    }
}
