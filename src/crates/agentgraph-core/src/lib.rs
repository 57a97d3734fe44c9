//! # agentgraph-core - typed state graphs for LLM agents
//!
//! Build an agent as a graph of async nodes over a typed state, run it in
//! supersteps, suspend it for a human, and resume it later.
//!
//! ## Core concepts
//!
//! ### State and reducers
//!
//! A state is a plain struct declared with [`graph_state!`]. Each field
//! names the [`Reducer`](state::Reducer) that merges updates into it;
//! nodes return a partial *update* with only the fields they write.
//!
//! | Policy | Merge |
//! |--------|-------|
//! | [`Overwrite`](state::Overwrite) | replace |
//! | [`Append`](state::Append) | extend a list |
//! | [`AddMessages`](state::AddMessages) | append, replacing messages with the same id |
//! | [`AppendOrOverwrite`](state::AppendOrOverwrite) | extend, or replace with `ListUpdate::Overwrite` |
//! | [`Sum`](state::Sum) | add |
//! | [`Merge`](state::Merge) | insert map entries |
//!
//! ### Graphs
//!
//! [`StateGraph`] collects nodes, direct edges and conditional edges, and
//! validates everything it can at [`compile`](StateGraph::compile) time.
//! Routers may fan out with [`Send`] packets.
//!
//! ### Execution
//!
//! A [`CompiledGraph`] runs in supersteps: all scheduled tasks run
//! concurrently against the same state, then their updates are merged in
//! scheduling order. With a checkpointer every superstep is persisted,
//! which enables [`resume`](CompiledGraph::resume),
//! [`get_state`](CompiledGraph::get_state) and
//! [`update_state`](CompiledGraph::update_state).
//!
//! ### Human in the loop
//!
//! Nodes call [`NodeContext::interrupt`] to ask for input. The run
//! suspends with a [`RunOutcome::Interrupted`]; resuming with a
//! [`Command`] re-runs the node and hands it the answer.
//!
//! ## Quick start
//!
//! ```rust
//! use agentgraph_core::{graph_state, state::Append, StateGraph, END, START};
//!
//! graph_state! {
//!     pub struct Trail (TrailUpdate) {
//!         pub visited: Vec<String> => Append,
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let mut graph = StateGraph::<Trail>::new();
//! graph
//!     .add_node("a", |_, _| async { Ok(TrailUpdate::default().visited(vec!["a".to_string()])) })
//!     .add_node("b", |_, _| async { Ok(TrailUpdate::default().visited(vec!["b".to_string()])) });
//! graph.add_edge(START, "a").add_edge("a", "b").add_edge("b", END);
//!
//! let compiled = graph.compile().unwrap();
//! let trail = compiled.invoke(TrailUpdate::default()).await.unwrap();
//! assert_eq!(trail.visited, vec!["a", "b"]);
//! # });
//! ```
//!
//! ## Building blocks for agents
//!
//! - [`generation`]: the GENERATE → GRADE → ACCEPT/ABORT loop with a
//!   bounded retry budget
//! - [`relevance`]: concurrent, order-preserving document grading and
//!   frequency-based deduplication
//! - [`llm`]: the [`ChatModel`](llm::ChatModel) trait, tool calling and
//!   structured output
//! - [`store`] and [`memory`]: namespaced long-term storage and per-user
//!   profiles

pub mod builder;
pub mod compiled;
pub mod error;
pub mod generation;
pub mod graph;
pub mod interrupt;
pub mod llm;
pub mod memory;
pub mod messages;
pub mod relevance;
pub mod retry;
pub mod runtime;
pub mod send;
pub mod state;
pub mod store;
pub mod stream;
pub mod visualization;

pub use builder::{CompileOptions, StateGraph};
pub use compiled::{CompiledGraph, EventStream, RunOutcome, StateSnapshot};
pub use error::{GraphError, Result};
pub use generation::{
    route_grade, ExhaustionPolicy, GenerationLoop, GradeDecision, GradeRoute, LoopOutcome, LoopState,
    RetryBudget,
};
pub use graph::{Edge, Graph, NodeId, END, START};
pub use interrupt::{
    ActionRequest, Command, HumanInterrupt, HumanInterruptConfig, HumanResponse, Interrupt, Resume,
};
pub use messages::{add_messages, Message, MessageRole};
pub use relevance::{dedup_top_k, filter_relevant, Document, DocumentGrader};
pub use retry::{retry_async, RetryPolicy};
pub use runtime::{NodeContext, RunConfig, DEFAULT_RECURSION_LIMIT};
pub use send::{ConditionalEdgeResult, Send};
pub use state::GraphState;
pub use store::{InMemoryStore, Item, Store, StoreError};
pub use stream::{StreamEvent, StreamMode};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};

pub use agentgraph_checkpoint::{CheckpointConfig, CheckpointSaver, InMemoryCheckpointSaver, InterruptKind};
