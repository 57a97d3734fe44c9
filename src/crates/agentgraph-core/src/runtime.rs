//! Run configuration and the per-task node context
//!
//! [`RunConfig`] is what a caller passes to
//! [`CompiledGraph::invoke_with_config`](crate::CompiledGraph::invoke_with_config): the thread to persist
//! under, the superstep budget and free-form `configurable` values such as a
//! user id or model name.
//!
//! Every node invocation receives a [`NodeContext`]. Through it a node can
//! read the run configuration, reach the long-term [`Store`], emit custom
//! stream events and suspend the run for human input with
//! [`NodeContext::interrupt`].
//!
//! # Example
//!
//! ```rust
//! use agentgraph_core::runtime::RunConfig;
//!
//! let config = RunConfig::for_thread("thread-1")
//!     .with_recursion_limit(10)
//!     .with_configurable("user_id", "user-42");
//!
//! assert_eq!(config.thread_id.as_deref(), Some("thread-1"));
//! assert_eq!(config.configurable::<String>("user_id").as_deref(), Some("user-42"));
//! ```

use crate::error::{GraphError, Result};
use crate::interrupt::Interrupt;
use crate::store::Store;
use agentgraph_checkpoint::CheckpointConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Superstep budget used when none is configured
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Per-run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Conversation thread; required whenever a checkpointer is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Continue from this checkpoint instead of the thread's latest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Maximum supersteps a single invocation may take
    pub recursion_limit: usize,

    /// Application values visible to nodes
    #[serde(default)]
    pub configurable: HashMap<String, Value>,

    /// Deadline for each node attempt
    #[serde(skip)]
    pub node_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            checkpoint_id: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            configurable: HashMap::new(),
            node_timeout: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self::default().with_thread_id(thread_id)
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_configurable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.configurable.insert(key.into(), value.into());
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    /// Typed lookup of a `configurable` value; `None` when absent or of
    /// another shape
    pub fn configurable<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.configurable
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Checkpoint address of this run, when it has a thread
    pub fn checkpoint_config(&self) -> Option<CheckpointConfig> {
        self.thread_id.as_ref().map(|thread_id| {
            let config = CheckpointConfig::for_thread(thread_id.clone());
            match &self.checkpoint_id {
                Some(id) => config.with_checkpoint_id(id.clone()),
                None => config,
            }
        })
    }
}

/// Sink for custom stream events; receives the emitting node and payload
pub(crate) type EventSink = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Context handed to each node invocation
#[derive(Clone)]
pub struct NodeContext {
    node: String,
    task_id: String,
    step: usize,
    remaining_steps: usize,
    config: Arc<RunConfig>,
    store: Option<Arc<dyn Store>>,
    resume: Arc<Vec<Value>>,
    interrupt_index: Arc<AtomicUsize>,
    sink: Option<EventSink>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node)
            .field("task_id", &self.task_id)
            .field("step", &self.step)
            .field("remaining_steps", &self.remaining_steps)
            .field("resume", &self.resume)
            .finish()
    }
}

impl NodeContext {
    pub(crate) fn new(node: impl Into<String>, task_id: impl Into<String>, config: Arc<RunConfig>) -> Self {
        Self {
            node: node.into(),
            task_id: task_id.into(),
            step: 0,
            remaining_steps: config.recursion_limit,
            config,
            store: None,
            resume: Arc::new(Vec::new()),
            interrupt_index: Arc::new(AtomicUsize::new(0)),
            sink: None,
        }
    }

    pub(crate) fn with_step(mut self, step: usize, remaining_steps: usize) -> Self {
        self.step = step;
        self.remaining_steps = remaining_steps;
        self
    }

    pub(crate) fn with_store(mut self, store: Option<Arc<dyn Store>>) -> Self {
        self.store = store;
        self
    }

    pub(crate) fn with_resume(mut self, resume: Vec<Value>) -> Self {
        self.resume = Arc::new(resume);
        self
    }

    pub(crate) fn with_sink(mut self, sink: Option<EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Copy of this context for a fresh attempt of the same task
    pub(crate) fn fresh_attempt(&self) -> Self {
        let mut ctx = self.clone();
        ctx.interrupt_index = Arc::new(AtomicUsize::new(0));
        ctx
    }

    /// Detached context for calling a node body outside a run, e.g. in tests
    pub fn detached(node: impl Into<String>) -> Self {
        Self::new(node, "detached", Arc::new(RunConfig::default()))
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Superstep this task runs in, counted from the thread's first run
    pub fn step(&self) -> usize {
        self.step
    }

    /// Supersteps left in this invocation's budget
    pub fn remaining_steps(&self) -> usize {
        self.remaining_steps
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.config.thread_id.as_deref()
    }

    pub fn configurable<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config.configurable(key)
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    /// Store or a configuration error naming this node
    pub fn require_store(&self) -> Result<&Arc<dyn Store>> {
        self.store.as_ref().ok_or_else(|| {
            GraphError::Configuration(format!(
                "Node '{}' needs a store; compile the graph with one",
                self.node
            ))
        })
    }

    /// Emit a custom event to `stream` consumers; a no-op otherwise
    pub fn emit(&self, data: impl Into<Value>) {
        if let Some(sink) = &self.sink {
            sink(&self.node, data.into());
        }
    }

    /// Suspend the run and ask a human for input
    ///
    /// On the first execution this returns
    /// `Err(GraphError::NodeInterrupt(..))`; propagate it with `?`. When the
    /// run is resumed the node executes again from the top, and this call
    /// returns the value supplied to
    /// [`CompiledGraph::resume`](crate::CompiledGraph::resume).
    ///
    /// ```rust,ignore
    /// async fn human_input(_state: State, ctx: NodeContext) -> Result<StateUpdate> {
    ///     let reply = ctx.interrupt("Please provide input.")?;
    ///     let text = reply.as_str().unwrap_or_default().to_string();
    ///     Ok(StateUpdate::default().messages(vec![Message::human(text)]))
    /// }
    /// ```
    pub fn interrupt(&self, value: impl Into<Value>) -> Result<Value> {
        let index = self.interrupt_index.fetch_add(1, Ordering::SeqCst);
        match self.resume.get(index) {
            Some(resumed) => Ok(resumed.clone()),
            None => Err(GraphError::NodeInterrupt(Box::new(Interrupt::dynamic(
                format!("{}-{}", self.task_id, index),
                self.node.clone(),
                value.into(),
            )))),
        }
    }

    /// [`interrupt`](Self::interrupt) with the resume value decoded into `R`
    pub fn interrupt_as<R: DeserializeOwned>(&self, value: impl Into<Value>) -> Result<R> {
        let resumed = self.interrupt(value)?;
        serde_json::from_value(resumed).map_err(|e| {
            GraphError::state_error(Some(self.node.clone()), format!("invalid resume value: {}", e))
        })
    }
}
