//! Router results and dynamic fan-out
//!
//! A conditional edge's router looks at the state and returns a
//! [`ConditionalEdgeResult`]: one branch label, several labels to run in
//! parallel, or a list of [`Send`] packets.
//!
//! A `Send` names a node and carries the exact state that one invocation of
//! that node should see. Returning N packets spawns N independent tasks in
//! the next superstep; their updates are merged back into the shared state
//! through the field reducers, in packet order.
//!
//! ```text
//!                    ┌─▶ retrieve(state with question = q0) ─┐
//!   expand_query ────┼─▶ retrieve(state with question = q1) ─┼─▶ grade
//!      (router)      └─▶ retrieve(state with question = q2) ─┘
//! ```
//!
//! ```rust
//! use agentgraph_core::send::{ConditionalEdgeResult, Send};
//!
//! #[derive(Clone)]
//! struct Query { text: String }
//!
//! let variants = vec!["q0", "q1", "q2"];
//! let result: ConditionalEdgeResult<Query> = variants
//!     .into_iter()
//!     .map(|q| Send::new("retrieve", Query { text: q.to_string() }))
//!     .collect::<Vec<_>>()
//!     .into();
//!
//! assert!(matches!(result, ConditionalEdgeResult::Sends(ref s) if s.len() == 3));
//! ```

use crate::graph::NodeId;

/// One dynamically spawned node invocation
#[derive(Debug, Clone)]
pub struct Send<S> {
    node: NodeId,
    arg: S,
}

impl<S> Send<S> {
    pub fn new(node: impl Into<NodeId>, arg: S) -> Self {
        Self {
            node: node.into(),
            arg,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn arg(&self) -> &S {
        &self.arg
    }

    pub fn into_parts(self) -> (NodeId, S) {
        (self.node, self.arg)
    }
}

/// What a router decided
#[derive(Debug, Clone)]
pub enum ConditionalEdgeResult<S> {
    /// Follow one branch
    Label(String),

    /// Follow several branches in parallel
    Labels(Vec<String>),

    /// Spawn one task per packet; an empty list ends this path
    Sends(Vec<Send<S>>),
}

impl<S> ConditionalEdgeResult<S> {
    /// Number of tasks this result will schedule at most
    pub fn width(&self) -> usize {
        match self {
            ConditionalEdgeResult::Label(_) => 1,
            ConditionalEdgeResult::Labels(labels) => labels.len(),
            ConditionalEdgeResult::Sends(sends) => sends.len(),
        }
    }
}

impl<S> From<&str> for ConditionalEdgeResult<S> {
    fn from(label: &str) -> Self {
        ConditionalEdgeResult::Label(label.to_string())
    }
}

impl<S> From<String> for ConditionalEdgeResult<S> {
    fn from(label: String) -> Self {
        ConditionalEdgeResult::Label(label)
    }
}

impl<S> From<Vec<String>> for ConditionalEdgeResult<S> {
    fn from(labels: Vec<String>) -> Self {
        ConditionalEdgeResult::Labels(labels)
    }
}

impl<S> From<Vec<&str>> for ConditionalEdgeResult<S> {
    fn from(labels: Vec<&str>) -> Self {
        ConditionalEdgeResult::Labels(labels.into_iter().map(str::to_string).collect())
    }
}

impl<S> From<Vec<Send<S>>> for ConditionalEdgeResult<S> {
    fn from(sends: Vec<Send<S>>) -> Self {
        ConditionalEdgeResult::Sends(sends)
    }
}

impl<S> From<Send<S>> for ConditionalEdgeResult<S> {
    fn from(send: Send<S>) -> Self {
        ConditionalEdgeResult::Sends(vec![send])
    }
}
