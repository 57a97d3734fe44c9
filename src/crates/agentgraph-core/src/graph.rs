//! Graph structure and static validation
//!
//! A [`Graph`] is the adjacency structure behind a
//! [`StateGraph`](crate::StateGraph): named nodes, and for every source a
//! list of outgoing [`Edge`]s. The two reserved names [`START`] and [`END`]
//! mark where a run begins and where a path stops.
//!
//! ```text
//!   START ──▶ retrieve ──▶ grade_documents ──┬── "some relevant" ──▶ generate
//!                                            └── "none relevant" ──▶ END
//! ```
//!
//! # Validation
//!
//! [`Graph::validate`] runs once, at compile time, and rejects:
//!
//! - a graph with no edge leaving [`START`]
//! - edges from unknown sources
//! - direct or branch targets that are neither a node nor [`END`]
//! - edges into [`START`]
//! - nodes without any outgoing edge
//!
//! What cannot be checked statically is *which* label a router returns at
//! run time. A router returning a label missing from its branch map fails
//! at first use with [`GraphError::Routing`](crate::GraphError::Routing).

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::runtime::NodeContext;
use crate::send::ConditionalEdgeResult;
use crate::state::GraphState;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Node identifier, unique within a graph
pub type NodeId = String;

/// Entry sentinel: edges from `START` select the first node(s) of a run
pub const START: &str = "__start__";

/// Terminal sentinel: routing here stops the current path
pub const END: &str = "__end__";

/// Boxed async node body
pub type NodeFn<S> =
    Arc<dyn Fn(S, NodeContext) -> BoxFuture<'static, Result<<S as GraphState>::Update>> + Send + Sync>;

/// Router of a conditional edge
pub type RouterFn<S> = Arc<dyn Fn(&S) -> ConditionalEdgeResult<S> + Send + Sync>;

/// A registered node
pub struct NodeSpec<S: GraphState> {
    pub name: NodeId,
    pub func: NodeFn<S>,
    /// Retry applied when the node returns an error
    pub retry: Option<RetryPolicy>,
}

impl<S: GraphState> Clone for NodeSpec<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
            retry: self.retry.clone(),
        }
    }
}

impl<S: GraphState> std::fmt::Debug for NodeSpec<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("func", &"<function>")
            .field("retry", &self.retry)
            .finish()
    }
}

/// Outgoing transition of a node
pub enum Edge<S> {
    /// Always continue to this node
    Direct(NodeId),

    /// Ask a router; its labels are resolved through `branches`
    ///
    /// An empty `branches` map means the router returns node names
    /// directly.
    Conditional {
        router: RouterFn<S>,
        branches: HashMap<String, NodeId>,
    },
}

impl<S> Clone for Edge<S> {
    fn clone(&self) -> Self {
        match self {
            Edge::Direct(to) => Edge::Direct(to.clone()),
            Edge::Conditional { router, branches } => Edge::Conditional {
                router: Arc::clone(router),
                branches: branches.clone(),
            },
        }
    }
}

impl<S> std::fmt::Debug for Edge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(node_id) => f.debug_tuple("Direct").field(node_id).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

impl<S> Edge<S> {
    /// Every node this edge may lead to, in a stable order
    pub fn targets(&self) -> Vec<&NodeId> {
        match self {
            Edge::Direct(to) => vec![to],
            Edge::Conditional { branches, .. } => {
                let mut targets: Vec<&NodeId> = branches.values().collect();
                targets.sort();
                targets.dedup();
                targets
            }
        }
    }
}

/// Nodes plus edges, in registration order
pub struct Graph<S: GraphState> {
    pub nodes: HashMap<NodeId, NodeSpec<S>>,
    /// Registration order of `nodes`
    pub order: Vec<NodeId>,
    pub edges: HashMap<NodeId, Vec<Edge<S>>>,
}

impl<S: GraphState> Clone for Graph<S> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            order: self.order.clone(),
            edges: self.edges.clone(),
        }
    }
}

impl<S: GraphState> std::fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("order", &self.order)
            .field("edges", &self.edges)
            .finish()
    }
}

impl<S: GraphState> Default for Graph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> Graph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
        }
    }

    /// Register a node, replacing any node of the same name
    pub fn add_node(&mut self, spec: NodeSpec<S>) {
        if !self.nodes.contains_key(&spec.name) {
            self.order.push(spec.name.clone());
        }
        self.nodes.insert(spec.name.clone(), spec);
    }

    pub fn add_edge(&mut self, from: NodeId, edge: Edge<S>) {
        self.edges.entry(from).or_default().push(edge);
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn is_target(&self, name: &str) -> bool {
        name == END || self.has_node(name)
    }

    /// Check the structure; see the module docs for the rules
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.edges.get(START).map_or(true, Vec::is_empty) {
            return Err("Graph has no entry point: add an edge from START".to_string());
        }

        let mut sources: Vec<&NodeId> = self.edges.keys().collect();
        sources.sort();

        for from in sources {
            if from != START && !self.has_node(from) {
                return Err(format!("Edge source {} does not exist", from));
            }

            for edge in &self.edges[from] {
                match edge {
                    Edge::Direct(to) => {
                        if to == START {
                            return Err(format!("Edge from {} may not target START", from));
                        }
                        if !self.is_target(to) {
                            return Err(format!("Edge target {} does not exist", to));
                        }
                    }
                    Edge::Conditional { branches, .. } => {
                        let mut labels: Vec<_> = branches.iter().collect();
                        labels.sort();
                        for (label, to) in labels {
                            if !self.is_target(to) {
                                return Err(format!(
                                    "Branch '{}' of {} targets {} which does not exist",
                                    label, from, to
                                ));
                            }
                        }
                    }
                }
            }
        }

        for name in &self.order {
            if self.edges.get(name).map_or(true, Vec::is_empty) {
                return Err(format!(
                    "Node {} has no outgoing edge; connect it to another node or END",
                    name
                ));
            }
        }

        Ok(())
    }

    /// Nodes no edge chain from START can reach
    ///
    /// Nodes reached only through routers without a branch map (or through
    /// `Send`) are reported too, since their targets are not declared.
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([START]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for edge in self.edges.get(current).into_iter().flatten() {
                for target in edge.targets() {
                    queue.push_back(target.as_str());
                }
            }
        }

        self.order
            .iter()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect()
    }
}
