//! Events emitted while a graph runs
//!
//! [`CompiledGraph::stream`](crate::CompiledGraph::stream) yields a
//! [`StreamEvent`] for every observable step of a run. Consumers pick the
//! kinds they care about with [`StreamMode`]:
//!
//! | Mode | Events | Use |
//! |------|--------|-----|
//! | `Tasks` | `TaskStart` | progress indicators |
//! | `Updates` | `Update` (one per finished task) | incremental rendering |
//! | `Values` | `Values` (full state after each superstep) | state inspection |
//! | `Custom` | `Custom` (from [`NodeContext::emit`](crate::NodeContext::emit)) | application events |
//!
//! `Interrupt` and `Done` are delivered in every mode.
//!
//! ```text
//!   superstep 0:  TaskStart(retrieve) ─ Update(retrieve) ─ Values
//!   superstep 1:  TaskStart(grade) ──── Update(grade) ──── Values
//!                 ...
//!   end:          Done(final state)   or   Interrupt(..)
//! ```

use crate::interrupt::Interrupt;
use crate::state::GraphState;
use serde_json::Value;

/// Kind of event a consumer subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    Tasks,
    Updates,
    Values,
    Custom,
}

impl StreamMode {
    pub const ALL: [StreamMode; 4] = [
        StreamMode::Tasks,
        StreamMode::Updates,
        StreamMode::Values,
        StreamMode::Custom,
    ];
}

/// One observable step of a run
#[derive(Debug, Clone)]
pub enum StreamEvent<S: GraphState> {
    /// A task is about to execute
    TaskStart {
        step: usize,
        task_id: String,
        node: String,
    },

    /// A task finished; its update is about to be merged
    Update {
        step: usize,
        node: String,
        update: S::Update,
    },

    /// State after a superstep's updates were merged
    Values { step: usize, state: S },

    /// Emitted by a node
    Custom { node: String, data: Value },

    /// The run suspended here
    Interrupt(Interrupt),

    /// The run completed with this state
    Done(S),
}

impl<S: GraphState> StreamEvent<S> {
    /// Mode this event belongs to; `None` for events delivered in every mode
    pub fn mode(&self) -> Option<StreamMode> {
        match self {
            StreamEvent::TaskStart { .. } => Some(StreamMode::Tasks),
            StreamEvent::Update { .. } => Some(StreamMode::Updates),
            StreamEvent::Values { .. } => Some(StreamMode::Values),
            StreamEvent::Custom { .. } => Some(StreamMode::Custom),
            StreamEvent::Interrupt(_) | StreamEvent::Done(_) => None,
        }
    }

    pub fn is_selected(&self, modes: &[StreamMode]) -> bool {
        self.mode().map_or(true, |mode| modes.contains(&mode))
    }

    /// Node the event concerns, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            StreamEvent::TaskStart { node, .. }
            | StreamEvent::Update { node, .. }
            | StreamEvent::Custom { node, .. } => Some(node),
            StreamEvent::Interrupt(interrupt) => Some(&interrupt.node),
            StreamEvent::Values { .. } | StreamEvent::Done(_) => None,
        }
    }
}
