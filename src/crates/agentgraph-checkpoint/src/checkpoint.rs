//! Checkpoint data structures
//!
//! A [`Checkpoint`] is a snapshot of one graph run taken at a superstep
//! boundary. It holds the serialized state, the tasks that are about to run
//! (or were running when the graph suspended), and the resume values those
//! tasks have been given so far.
//!
//! ```text
//! CheckpointTuple
//! ├── config          thread_id + checkpoint_id
//! ├── checkpoint
//! │   ├── state       serialized graph state (JSON)
//! │   ├── step        superstep number
//! │   └── tasks       [PendingTask { id, node, input?, resume[] }]
//! ├── metadata        source, step, interrupt kind, extra
//! ├── pending_writes  [(task_id, channel, value)]
//! └── parent_config   previous checkpoint of the same thread
//! ```
//!
//! Writes recorded with
//! [`CheckpointSaver::put_writes`](crate::traits::CheckpointSaver::put_writes)
//! belong to the checkpoint they were written against. When a superstep is
//! interrupted, the writes of the tasks that finished are kept there so that
//! resuming only re-runs the tasks that did not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier of a checkpoint
pub type CheckpointId = String;

/// A write produced by a task: `(task_id, channel, value)`
pub type PendingWrite = (String, String, serde_json::Value);

/// Channel used for a task's state update
pub const UPDATE_CHANNEL: &str = "__update__";

/// Channel used for the payload of an interrupt raised by a task
pub const INTERRUPT_CHANNEL: &str = "__interrupt__";

/// How a checkpoint came to be written
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written when input was applied at the start of a run
    Input,
    /// Written by the superstep loop
    Loop,
    /// Written by an external state update
    Update,
}

/// Why a run suspended at this checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// A static breakpoint before the pending tasks
    Before,
    /// A static breakpoint after the previous superstep
    After,
    /// A node called `interrupt` while running
    Dynamic,
}

/// Metadata stored alongside a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i32>,

    /// Set when the run suspended here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptKind>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_interrupt(mut self, kind: InterruptKind) -> Self {
        self.interrupt = Some(kind);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A task scheduled for the next superstep
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTask {
    /// Stable id, unique within the checkpoint
    pub id: String,

    /// Node the task runs
    pub node: String,

    /// Private input for `Send` tasks. `None` means the task reads the
    /// checkpoint state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,

    /// Resume values supplied so far, in the order the node asked for them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resume: Vec<serde_json::Value>,
}

impl PendingTask {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node: node.into(),
            input: None,
            resume: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }
}

/// Snapshot of a graph run at a superstep boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version
    pub v: i32,

    pub id: CheckpointId,

    pub ts: DateTime<Utc>,

    /// Superstep the pending tasks belong to
    pub step: i32,

    /// Serialized graph state
    pub state: serde_json::Value,

    /// Tasks that have not yet been committed
    #[serde(default)]
    pub tasks: Vec<PendingTask>,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(step: i32, state: serde_json::Value, tasks: Vec<PendingTask>) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            step,
            state,
            tasks,
        }
    }

    /// True when the run this checkpoint belongs to has nothing left to do
    pub fn is_terminal(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Identifies a thread and optionally one checkpoint within it
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config pointing at the latest checkpoint of `thread_id`
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_id: None,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// A checkpoint together with everything stored about it
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub pending_writes: Vec<PendingWrite>,
    pub parent_config: Option<CheckpointConfig>,
}

impl CheckpointTuple {
    /// Writes recorded for one task
    pub fn writes_for<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a PendingWrite> {
        self.pending_writes
            .iter()
            .filter(move |(id, _, _)| id == task_id)
    }
}
