//! Inspecting and editing persisted runs

use super::execution::{route_from, step_from_i32, Task, INTERRUPT_NODES_KEY};
use super::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::NodeId;
use crate::interrupt::Interrupt;
use crate::runtime::RunConfig;
use crate::state::GraphState;
use agentgraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
    CheckpointTuple, InterruptKind, INTERRUPT_CHANNEL,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;

/// A persisted superstep boundary
#[derive(Debug, Clone)]
pub struct StateSnapshot<S> {
    /// State at this checkpoint
    pub values: S,
    /// Nodes scheduled to run next; empty when the run completed
    pub next: Vec<NodeId>,
    /// Suspensions waiting at this checkpoint
    pub interrupts: Vec<Interrupt>,
    pub config: CheckpointConfig,
    pub parent_config: Option<CheckpointConfig>,
    pub metadata: CheckpointMetadata,
    pub step: usize,
    pub created_at: DateTime<Utc>,
}

impl<S> StateSnapshot<S> {
    pub fn is_interrupted(&self) -> bool {
        !self.interrupts.is_empty()
    }
}

fn snapshot<S: GraphState>(tuple: CheckpointTuple) -> Result<StateSnapshot<S>> {
    let mut interrupts: Vec<Interrupt> = tuple
        .pending_writes
        .iter()
        .filter(|(_, channel, _)| channel == INTERRUPT_CHANNEL)
        .map(|(_, _, value)| serde_json::from_value(value.clone()))
        .collect::<std::result::Result<_, _>>()?;

    if let Some(kind) = tuple.metadata.interrupt {
        let nodes: Vec<String> = tuple
            .metadata
            .extra
            .get(INTERRUPT_NODES_KEY)
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        for node in nodes {
            let id = tuple
                .checkpoint
                .tasks
                .iter()
                .find(|t| t.node == node && kind == InterruptKind::Before)
                .map_or_else(|| node.clone(), |t| t.id.clone());
            interrupts.push(Interrupt::static_point(&id, &node, kind));
        }
    }

    Ok(StateSnapshot {
        values: serde_json::from_value(tuple.checkpoint.state)?,
        next: tuple.checkpoint.tasks.iter().map(|t| t.node.clone()).collect(),
        interrupts,
        config: tuple.config,
        parent_config: tuple.parent_config,
        metadata: tuple.metadata,
        step: step_from_i32(tuple.checkpoint.step),
        created_at: tuple.checkpoint.ts,
    })
}

impl<S: GraphState> CompiledGraph<S> {
    fn require_persistence(&self, config: &RunConfig) -> Result<(&Arc<dyn CheckpointSaver>, CheckpointConfig)> {
        let saver = self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::Configuration(format!("graph '{}' has no checkpointer", self.name))
        })?;
        let address = config
            .checkpoint_config()
            .ok_or_else(|| GraphError::Configuration("RunConfig.thread_id is required".to_string()))?;
        Ok((saver, address))
    }

    /// Latest snapshot of the thread (or the checkpoint named in `config`)
    ///
    /// `None` when the thread has no checkpoint yet.
    pub async fn get_state(&self, config: &RunConfig) -> Result<Option<StateSnapshot<S>>> {
        let (saver, address) = self.require_persistence(config)?;
        saver.get_tuple(&address).await?.map(snapshot).transpose()
    }

    /// Snapshots of the thread, newest first
    pub async fn get_state_history(
        &self,
        config: &RunConfig,
        limit: Option<usize>,
    ) -> Result<Vec<StateSnapshot<S>>> {
        let (saver, address) = self.require_persistence(config)?;
        let thread = CheckpointConfig {
            checkpoint_id: None,
            ..address.clone()
        };
        let before = address.checkpoint_id.is_some().then_some(&address);

        let mut stream = saver.list(Some(&thread), before, limit).await?;
        let mut snapshots = Vec::new();
        while let Some(tuple) = stream.next().await {
            snapshots.push(snapshot(tuple?)?);
        }
        Ok(snapshots)
    }

    /// Merge `update` into the thread's state as a new checkpoint
    ///
    /// With `as_node`, the update is treated as that node's output: the
    /// next tasks are computed from its outgoing edges. Without it the
    /// pending tasks are kept, together with the writes already recorded
    /// for them, so a suspended run can still be resumed.
    ///
    /// Returns the address of the new checkpoint.
    pub async fn update_state(
        &self,
        config: &RunConfig,
        update: S::Update,
        as_node: Option<&str>,
    ) -> Result<CheckpointConfig> {
        let (saver, address) = self.require_persistence(config)?;
        let current = saver.get_tuple(&address).await?;

        let (mut state, step, parent, pending, writes) = match current {
            Some(tuple) => (
                serde_json::from_value::<S>(tuple.checkpoint.state)?,
                tuple.checkpoint.step,
                tuple.config,
                tuple.checkpoint.tasks,
                tuple.pending_writes,
            ),
            None => (S::default(), 0, address, Vec::new(), Vec::new()),
        };
        state.apply(update);

        let (tasks, carried_writes) = match as_node {
            Some(node) => {
                if !self.graph.has_node(node) {
                    return Err(GraphError::Validation(format!("Node {} does not exist", node)));
                }
                let mut next: Vec<Task<S>> = Vec::new();
                let mut scheduled = HashSet::new();
                route_from(&self.graph, &state, node, &mut next, &mut scheduled)?;
                let tasks = next.iter().map(Task::to_pending).collect::<Result<Vec<_>>>()?;
                (tasks, Vec::new())
            }
            None => (pending, writes),
        };

        let mut metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Update)
            .with_step(step);
        if let Some(node) = as_node {
            metadata = metadata.with_extra("as_node", serde_json::json!(node));
        }

        let checkpoint = Checkpoint::new(step, serde_json::to_value(&state)?, tasks);
        let saved = saver.put(&parent, checkpoint, metadata).await?;
        for (task_id, channel, value) in carried_writes {
            saver
                .put_writes(&saved, vec![(channel, value)], task_id)
                .await?;
        }

        tracing::info!(
            graph = %self.name,
            thread_id = ?saved.thread_id,
            as_node = ?as_node,
            "state updated"
        );
        Ok(saved)
    }
}
