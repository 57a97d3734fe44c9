//! `StateGraph` builder
//!
//! [`StateGraph`] collects nodes and edges for a state type `S`, then
//! [`compile`](StateGraph::compile)s them into an executable
//! [`CompiledGraph`].
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  StateGraph<S>                                         │
//! │    add_node("retrieve", ..)                            │
//! │    add_node("generate", ..)                            │
//! │    add_edge(START, "retrieve")                         │
//! │    add_conditional_edges("retrieve", router, branches) │
//! └───────────────────────────┬────────────────────────────┘
//!                             │ compile() / compile_with(options)
//!                             │   validate structure, interrupt nodes
//!                             ▼
//! ┌────────────────────────────────────────────────────────┐
//! │  CompiledGraph<S>                                      │
//! │    invoke / run / resume / stream / get_state          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Builder methods never fail. Problems such as a duplicate node name are
//! recorded and reported together by `compile`, so graph definitions read
//! as a flat list of calls.
//!
//! # Example
//!
//! ```rust
//! use agentgraph_core::{graph_state, StateGraph, END, START};
//! use agentgraph_core::state::{Append, GraphState};
//!
//! graph_state! {
//!     pub struct Trace (TraceUpdate) {
//!         pub visited: Vec<String> => Append,
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> agentgraph_core::Result<()> {
//! let mut graph = StateGraph::<Trace>::new();
//! graph.add_node("a", |_state, _ctx| async {
//!     Ok(TraceUpdate::default().visited(vec!["a".to_string()]))
//! });
//! graph.add_node("b", |_state, _ctx| async {
//!     Ok(TraceUpdate::default().visited(vec!["b".to_string()]))
//! });
//! graph.add_edge(START, "a");
//! graph.add_edge("a", "b");
//! graph.add_edge("b", END);
//!
//! let app = graph.compile()?;
//! let result = app.invoke(TraceUpdate::default()).await?;
//! assert_eq!(result.visited, vec!["a", "b"]);
//! # Ok(())
//! # }
//! ```

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, NodeSpec, RouterFn, END, START};
use crate::retry::RetryPolicy;
use crate::runtime::NodeContext;
use crate::send::ConditionalEdgeResult;
use crate::state::GraphState;
use crate::store::Store;
use agentgraph_checkpoint::CheckpointSaver;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Options applied by [`StateGraph::compile_with`]
#[derive(Clone, Default)]
pub struct CompileOptions {
    pub checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub store: Option<Arc<dyn Store>>,
    /// Suspend before these nodes run
    pub interrupt_before: Vec<NodeId>,
    /// Suspend after these nodes run
    pub interrupt_after: Vec<NodeId>,
    /// Name used in logs and diagrams
    pub name: Option<String>,
    /// Supersteps a run of this graph is always allowed, whatever its
    /// [`RunConfig`](crate::RunConfig) says
    pub min_recursion_limit: Option<usize>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn interrupt_before<I, N>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn interrupt_after<I, N>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.interrupt_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Raise the recursion limit of every run to at least `steps`
    ///
    /// For graphs whose loops are bounded by their own budget, so the
    /// budget and not the superstep cap decides when they stop.
    pub fn with_min_recursion_limit(mut self, steps: usize) -> Self {
        self.min_recursion_limit = Some(steps);
        self
    }
}

impl std::fmt::Debug for CompileOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileOptions")
            .field("checkpointer", &self.checkpointer.is_some())
            .field("store", &self.store.is_some())
            .field("interrupt_before", &self.interrupt_before)
            .field("interrupt_after", &self.interrupt_after)
            .field("name", &self.name)
            .field("min_recursion_limit", &self.min_recursion_limit)
            .finish()
    }
}

/// Builder for a graph over state `S`
pub struct StateGraph<S: GraphState> {
    graph: Graph<S>,
    errors: Vec<String>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            errors: Vec::new(),
        }
    }

    /// Register an async node
    ///
    /// The node receives a snapshot of the state and its [`NodeContext`],
    /// and returns the partial update to merge.
    pub fn add_node<F, Fut>(&mut self, name: impl Into<NodeId>, node: F) -> &mut Self
    where
        F: Fn(S, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S::Update>> + Send + 'static,
    {
        self.register(name.into(), node, None)
    }

    /// Register a node that is re-run on error according to `policy`
    ///
    /// Interrupts are never retried.
    pub fn add_node_with_retry<F, Fut>(
        &mut self,
        name: impl Into<NodeId>,
        node: F,
        policy: RetryPolicy,
    ) -> &mut Self
    where
        F: Fn(S, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S::Update>> + Send + 'static,
    {
        self.register(name.into(), node, Some(policy))
    }

    fn register<F, Fut>(&mut self, name: NodeId, node: F, retry: Option<RetryPolicy>) -> &mut Self
    where
        F: Fn(S, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S::Update>> + Send + 'static,
    {
        if name == START || name == END {
            self.errors.push(format!("Node name {} is reserved", name));
            return self;
        }
        if name.is_empty() {
            self.errors.push("Node name must not be empty".to_string());
            return self;
        }
        if self.graph.has_node(&name) {
            self.errors.push(format!("Node {} is already registered", name));
            return self;
        }

        self.graph.add_node(NodeSpec {
            name,
            func: Arc::new(move |state, ctx| Box::pin(node(state, ctx))),
            retry,
        });
        self
    }

    /// Always continue from `from` to `to`
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        let from = from.into();
        if from == END {
            self.errors.push("END has no outgoing edges".to_string());
            return self;
        }
        self.graph.add_edge(from, Edge::Direct(to.into()));
        self
    }

    /// Route from `from` by calling `router` on the state after it ran
    ///
    /// The router returns labels; `branches` maps every label it may return
    /// to a node name or [`END`]. Targets are validated at compile time.
    /// A label outside the map fails the run with
    /// [`GraphError::Routing`] when it is first returned.
    pub fn add_conditional_edges<R, O, I, K, V>(
        &mut self,
        from: impl Into<NodeId>,
        router: R,
        branches: I,
    ) -> &mut Self
    where
        R: Fn(&S) -> O + Send + Sync + 'static,
        O: Into<ConditionalEdgeResult<S>>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let branches: HashMap<String, NodeId> = branches
            .into_iter()
            .map(|(label, to)| (label.into(), to.into()))
            .collect();
        if branches.is_empty() {
            let from = from.into();
            self.errors.push(format!(
                "Conditional edges from {} declare no branches; use add_dynamic_edges for routers returning node names",
                from
            ));
            return self;
        }
        let router: RouterFn<S> = Arc::new(move |state: &S| router(state).into());
        self.graph
            .add_edge(from.into(), Edge::Conditional { router, branches });
        self
    }

    /// Route from `from` with a router that names nodes directly
    ///
    /// Used for [`Send`](crate::send::Send) fan-out, where the target set is
    /// only known at run time. Returned names are checked when used.
    pub fn add_dynamic_edges<R, O>(&mut self, from: impl Into<NodeId>, router: R) -> &mut Self
    where
        R: Fn(&S) -> O + Send + Sync + 'static,
        O: Into<ConditionalEdgeResult<S>>,
    {
        let router: RouterFn<S> = Arc::new(move |state: &S| router(state).into());
        self.graph.add_edge(
            from.into(),
            Edge::Conditional {
                router,
                branches: HashMap::new(),
            },
        );
        self
    }

    /// Shorthand for `add_edge(START, node)`
    pub fn set_entry_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(START, node)
    }

    /// Shorthand for `add_edge(node, END)`
    pub fn set_finish_point(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(node, END)
    }

    pub fn graph(&self) -> &Graph<S> {
        &self.graph
    }

    /// Validate and build an executable graph
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        self.compile_with(CompileOptions::default())
    }

    /// Validate and build with a checkpointer, store or interrupt points
    pub fn compile_with(self, options: CompileOptions) -> Result<CompiledGraph<S>> {
        if !self.errors.is_empty() {
            return Err(GraphError::Validation(self.errors.join("; ")));
        }

        self.graph.validate().map_err(GraphError::Validation)?;

        for node in options.interrupt_before.iter().chain(&options.interrupt_after) {
            if !self.graph.has_node(node) {
                return Err(GraphError::Validation(format!(
                    "Interrupt node {} does not exist",
                    node
                )));
            }
        }

        let unreachable = self.graph.unreachable_nodes();
        if !unreachable.is_empty() {
            tracing::warn!(
                nodes = ?unreachable,
                "nodes are not reachable through declared edges"
            );
        }

        let name = options.name.unwrap_or_else(|| "graph".to_string());
        tracing::debug!(
            graph = %name,
            nodes = self.graph.order.len(),
            checkpointer = options.checkpointer.is_some(),
            "graph compiled"
        );

        Ok(CompiledGraph::new(
            self.graph,
            options.checkpointer,
            options.store,
            options.interrupt_before.into_iter().collect::<HashSet<_>>(),
            options.interrupt_after.into_iter().collect::<HashSet<_>>(),
            name,
        )
        .with_min_recursion_limit(options.min_recursion_limit.unwrap_or(0)))
    }
}
