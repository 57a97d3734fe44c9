//! Executable graphs
//!
//! A [`CompiledGraph`] runs a validated [`Graph`] in *supersteps*:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ superstep n                                                   │
//!   │                                                               │
//!   │  tasks ──▶ checkpoint(state, tasks) ──▶ run tasks concurrently │
//!   │                                              │                │
//!   │            apply updates in task order ◀─────┘                │
//!   │                     │                                         │
//!   │            follow edges of every task ──▶ tasks of n+1        │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The run ends when a superstep schedules no further task (every path
//! reached [`END`](crate::END)), when a node or static interrupt point
//! suspends it, or with an error.
//!
//! Every task of a superstep sees the same state snapshot. Updates are
//! merged only after all tasks of the step have finished, in the order the
//! tasks were scheduled, so the result never depends on which task finished
//! first. A node scheduled by several edges in one step runs once; each
//! [`Send`](crate::send::Send) packet runs as its own task.
//!
//! With a checkpointer attached, every superstep is persisted before it
//! runs and each task's update is recorded as soon as the step finishes.
//! That is what makes [`resume`](CompiledGraph::resume) possible: tasks that
//! completed before the suspension are not re-run.

mod execution;
mod state;
mod streaming;

pub use state::StateSnapshot;
pub use streaming::EventStream;

use crate::graph::{Graph, NodeId};
use crate::interrupt::Interrupt;
use crate::state::GraphState;
use crate::store::Store;
use agentgraph_checkpoint::CheckpointSaver;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a run that did not fail
#[derive(Debug, Clone)]
pub enum RunOutcome<S> {
    /// Every path reached `END`
    Complete(S),

    /// The run is suspended; resume it with
    /// [`CompiledGraph::resume`]
    Interrupted {
        /// State at the start of the suspended superstep
        state: S,
        interrupts: Vec<Interrupt>,
    },
}

impl<S> RunOutcome<S> {
    pub fn state(&self) -> &S {
        match self {
            RunOutcome::Complete(state) | RunOutcome::Interrupted { state, .. } => state,
        }
    }

    pub fn into_state(self) -> S {
        match self {
            RunOutcome::Complete(state) | RunOutcome::Interrupted { state, .. } => state,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted { .. })
    }

    pub fn interrupts(&self) -> &[Interrupt] {
        match self {
            RunOutcome::Complete(_) => &[],
            RunOutcome::Interrupted { interrupts, .. } => interrupts,
        }
    }
}

/// A validated graph ready to run
///
/// Cloning is cheap; clones share the graph, checkpointer and store.
pub struct CompiledGraph<S: GraphState> {
    graph: Arc<Graph<S>>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    store: Option<Arc<dyn Store>>,
    interrupt_before: Arc<HashSet<NodeId>>,
    interrupt_after: Arc<HashSet<NodeId>>,
    name: String,
    min_recursion_limit: usize,
}

impl<S: GraphState> Clone for CompiledGraph<S> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            checkpointer: self.checkpointer.clone(),
            store: self.store.clone(),
            interrupt_before: Arc::clone(&self.interrupt_before),
            interrupt_after: Arc::clone(&self.interrupt_after),
            name: self.name.clone(),
            min_recursion_limit: self.min_recursion_limit,
        }
    }
}

impl<S: GraphState> std::fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("nodes", &self.graph.order)
            .field("checkpointer", &self.checkpointer.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl<S: GraphState> CompiledGraph<S> {
    pub(crate) fn new(
        graph: Graph<S>,
        checkpointer: Option<Arc<dyn CheckpointSaver>>,
        store: Option<Arc<dyn Store>>,
        interrupt_before: HashSet<NodeId>,
        interrupt_after: HashSet<NodeId>,
        name: String,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            checkpointer,
            store,
            interrupt_before: Arc::new(interrupt_before),
            interrupt_after: Arc::new(interrupt_after),
            name,
            min_recursion_limit: 0,
        }
    }

    pub fn with_min_recursion_limit(mut self, steps: usize) -> Self {
        self.min_recursion_limit = steps;
        self
    }

    /// Supersteps every run is allowed at least
    pub fn min_recursion_limit(&self) -> usize {
        self.min_recursion_limit
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph<S> {
        &self.graph
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn CheckpointSaver>> {
        self.checkpointer.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }
}
