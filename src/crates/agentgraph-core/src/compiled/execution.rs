//! Superstep loop, invoke and resume

use super::{CompiledGraph, RunOutcome};
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, END, START};
use crate::interrupt::{Command, Interrupt};
use crate::retry::{retry_async, RetryPolicy};
use crate::runtime::{EventSink, NodeContext, RunConfig};
use crate::send::ConditionalEdgeResult;
use crate::state::GraphState;
use crate::stream::StreamEvent;
use agentgraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, InterruptKind,
    PendingTask, INTERRUPT_CHANNEL, UPDATE_CHANNEL,
};
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub(crate) type EventSender<S> = UnboundedSender<Result<StreamEvent<S>>>;

/// Metadata key listing the nodes a static interrupt stopped at
pub(crate) const INTERRUPT_NODES_KEY: &str = "interrupt_nodes";

fn step_to_i32(step: usize) -> i32 {
    i32::try_from(step).unwrap_or(i32::MAX)
}

pub(crate) fn step_from_i32(step: i32) -> usize {
    usize::try_from(step).unwrap_or(0)
}

/// One scheduled node invocation
#[derive(Debug, Clone)]
pub(super) struct Task<S> {
    pub id: String,
    pub node: NodeId,
    /// Private state of a `Send` task
    pub input: Option<S>,
    pub resume: Vec<Value>,
}

impl<S: GraphState> Task<S> {
    pub(super) fn for_node(node: impl Into<NodeId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node: node.into(),
            input: None,
            resume: Vec::new(),
        }
    }

    fn for_send(node: NodeId, arg: S) -> Self {
        Self {
            input: Some(arg),
            ..Self::for_node(node)
        }
    }

    pub(super) fn to_pending(&self) -> Result<PendingTask> {
        Ok(PendingTask {
            id: self.id.clone(),
            node: self.node.clone(),
            input: self.input.as_ref().map(serde_json::to_value).transpose()?,
            resume: self.resume.clone(),
        })
    }

    pub(super) fn from_pending(pending: PendingTask) -> Result<Self> {
        Ok(Self {
            id: pending.id,
            node: pending.node,
            input: pending.input.map(serde_json::from_value).transpose()?,
            resume: pending.resume,
        })
    }
}

enum TaskOutcome<U> {
    Done(U),
    Interrupted(Interrupt),
}

fn schedule_node<S: GraphState>(to: &str, next: &mut Vec<Task<S>>, scheduled: &mut HashSet<NodeId>) {
    if to != END && scheduled.insert(to.to_string()) {
        next.push(Task::for_node(to));
    }
}

fn resolve<S: GraphState>(
    graph: &Graph<S>,
    source: &str,
    branches: &HashMap<String, NodeId>,
    label: &str,
) -> Result<NodeId> {
    let routing_error = || GraphError::Routing {
        node: source.to_string(),
        label: label.to_string(),
    };
    let target = if branches.is_empty() {
        label.to_string()
    } else {
        branches.get(label).cloned().ok_or_else(routing_error)?
    };
    if target != END && !graph.has_node(&target) {
        return Err(routing_error());
    }
    Ok(target)
}

/// Schedule the successors of `source` given `state`
///
/// A node reached through several edges is scheduled once; every `Send`
/// packet becomes its own task.
pub(super) fn route_from<S: GraphState>(
    graph: &Graph<S>,
    state: &S,
    source: &str,
    next: &mut Vec<Task<S>>,
    scheduled: &mut HashSet<NodeId>,
) -> Result<()> {
    let Some(edges) = graph.edges.get(source) else {
        return Ok(());
    };

    for edge in edges {
        match edge {
            Edge::Direct(to) => schedule_node(to, next, scheduled),
            Edge::Conditional { router, branches } => match router(state) {
                ConditionalEdgeResult::Label(label) => {
                    let to = resolve(graph, source, branches, &label)?;
                    schedule_node(&to, next, scheduled);
                }
                ConditionalEdgeResult::Labels(labels) => {
                    for label in labels {
                        let to = resolve(graph, source, branches, &label)?;
                        schedule_node(&to, next, scheduled);
                    }
                }
                ConditionalEdgeResult::Sends(sends) => {
                    for send in sends {
                        let (node, arg) = send.into_parts();
                        if !graph.has_node(&node) {
                            return Err(GraphError::Routing {
                                node: source.to_string(),
                                label: node,
                            });
                        }
                        next.push(Task::for_send(node, arg));
                    }
                }
            },
        }
    }
    Ok(())
}

/// State of one invocation between supersteps
struct RunLoop<S: GraphState> {
    graph: CompiledGraph<S>,
    config: Arc<RunConfig>,
    /// Address of the latest checkpoint; `None` when not persisting
    checkpoint: Option<CheckpointConfig>,
    state: S,
    step: usize,
    steps_taken: usize,
    events: Option<EventSender<S>>,
}

impl<S: GraphState> RunLoop<S> {
    fn emit_with(&self, event: impl FnOnce() -> StreamEvent<S>) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(Ok(event()));
        }
    }

    fn sink(&self) -> Option<EventSink> {
        self.events.as_ref().map(|tx| {
            let tx = tx.clone();
            let sink: EventSink = Arc::new(move |node: &str, data: Value| {
                let _ = tx.send(Ok(StreamEvent::Custom {
                    node: node.to_string(),
                    data,
                }));
            });
            sink
        })
    }

    fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata::new()
            .with_source(CheckpointSource::Loop)
            .with_step(step_to_i32(self.step))
    }

    async fn save(&mut self, tasks: &[Task<S>], metadata: CheckpointMetadata) -> Result<()> {
        let (Some(saver), Some(address)) = (&self.graph.checkpointer, &self.checkpoint) else {
            return Ok(());
        };
        let pending = tasks
            .iter()
            .map(Task::to_pending)
            .collect::<Result<Vec<_>>>()?;
        let checkpoint = Checkpoint::new(
            step_to_i32(self.step),
            serde_json::to_value(&self.state)?,
            pending,
        );
        let next = saver.put(address, checkpoint, metadata).await?;
        tracing::debug!(step = self.step, checkpoint_id = ?next.checkpoint_id, "checkpoint saved");
        self.checkpoint = Some(next);
        Ok(())
    }

    async fn record(&self, task_id: &str, channel: &str, value: Value) -> Result<()> {
        if let (Some(saver), Some(address)) = (&self.graph.checkpointer, &self.checkpoint) {
            saver
                .put_writes(address, vec![(channel.to_string(), value)], task_id.to_string())
                .await?;
        }
        Ok(())
    }

    fn suspend(self, interrupts: Vec<Interrupt>) -> RunOutcome<S> {
        if self.graph.checkpointer.is_none() {
            tracing::warn!(
                graph = %self.graph.name,
                "run suspended without a checkpointer; it cannot be resumed"
            );
        }
        tracing::info!(
            graph = %self.graph.name,
            step = self.step,
            nodes = ?interrupts.iter().map(|i| i.node.as_str()).collect::<Vec<_>>(),
            "run suspended"
        );
        for interrupt in &interrupts {
            self.emit_with(|| StreamEvent::Interrupt(interrupt.clone()));
        }
        RunOutcome::Interrupted {
            state: self.state,
            interrupts,
        }
    }

    async fn run_task(
        &self,
        task: &Task<S>,
        remaining: usize,
    ) -> Result<(String, TaskOutcome<S::Update>)> {
        let spec = self.graph.graph.nodes.get(&task.node).ok_or_else(|| {
            GraphError::Execution(format!("Node {} is not registered", task.node))
        })?;
        let node = task.node.as_str();
        let input = task.input.clone().unwrap_or_else(|| self.state.clone());
        let ctx = NodeContext::new(node, task.id.clone(), Arc::clone(&self.config))
            .with_step(self.step, remaining)
            .with_store(self.graph.store.clone())
            .with_resume(task.resume.clone())
            .with_sink(self.sink());
        let policy = spec.retry.clone().unwrap_or_else(|| RetryPolicy::new(1));
        let timeout = self.config.node_timeout;

        tracing::debug!(node, task_id = %task.id, step = self.step, "task started");

        let result = retry_async(
            &policy,
            |err: &GraphError| !err.is_interrupt(),
            |_| {
                let fut = (spec.func)(input.clone(), ctx.fresh_attempt());
                async move {
                    match timeout {
                        Some(limit) => match tokio::time::timeout(limit, fut).await {
                            Ok(result) => result,
                            Err(_) => Err(GraphError::Timeout {
                                operation: format!("node {}", node),
                                duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                            }),
                        },
                        None => fut.await,
                    }
                }
            },
        )
        .await;

        match result {
            Ok(update) => Ok((task.id.clone(), TaskOutcome::Done(update))),
            Err(GraphError::NodeInterrupt(interrupt)) => {
                tracing::debug!(node, interrupt_id = %interrupt.id, "node requested human input");
                Ok((task.id.clone(), TaskOutcome::Interrupted(*interrupt)))
            }
            Err(err) => {
                tracing::error!(node, step = self.step, error = %err, "node failed");
                Err(err.in_node(node))
            }
        }
    }

    async fn drive(
        mut self,
        mut tasks: Vec<Task<S>>,
        mut carried: HashMap<String, S::Update>,
        mut skip_before: bool,
    ) -> Result<RunOutcome<S>> {
        loop {
            if tasks.is_empty() {
                self.save(&[], self.metadata()).await?;
                tracing::info!(
                    graph = %self.graph.name,
                    steps = self.steps_taken,
                    "run complete"
                );
                self.emit_with(|| StreamEvent::Done(self.state.clone()));
                return Ok(RunOutcome::Complete(self.state));
            }

            if self.steps_taken >= self.config.recursion_limit {
                tracing::error!(
                    graph = %self.graph.name,
                    limit = self.config.recursion_limit,
                    "recursion limit reached"
                );
                return Err(GraphError::RecursionLimit {
                    limit: self.config.recursion_limit,
                });
            }

            if !skip_before {
                let stops: Vec<Interrupt> = tasks
                    .iter()
                    .filter(|t| {
                        !carried.contains_key(&t.id) && self.graph.interrupt_before.contains(&t.node)
                    })
                    .map(|t| Interrupt::static_point(&t.id, &t.node, InterruptKind::Before))
                    .collect();
                if !stops.is_empty() {
                    let nodes: Vec<&str> = stops.iter().map(|i| i.node.as_str()).collect();
                    let metadata = self
                        .metadata()
                        .with_interrupt(InterruptKind::Before)
                        .with_extra(INTERRUPT_NODES_KEY, json!(nodes));
                    self.save(&tasks, metadata).await?;
                    return Ok(self.suspend(stops));
                }
            }
            skip_before = false;

            self.save(&tasks, self.metadata()).await?;
            for (task_id, update) in &carried {
                self.record(task_id, UPDATE_CHANNEL, serde_json::to_value(update)?)
                    .await?;
            }

            let remaining = self.config.recursion_limit.saturating_sub(self.steps_taken);
            let runs = tasks
                .iter()
                .filter(|t| !carried.contains_key(&t.id))
                .map(|task| {
                    self.emit_with(|| StreamEvent::TaskStart {
                        step: self.step,
                        task_id: task.id.clone(),
                        node: task.node.clone(),
                    });
                    self.run_task(task, remaining)
                });
            let mut outcomes: HashMap<String, TaskOutcome<S::Update>> =
                try_join_all(runs).await?.into_iter().collect();

            let mut interrupts = Vec::new();
            for task in &tasks {
                match outcomes.get(&task.id) {
                    Some(TaskOutcome::Done(update)) => {
                        self.record(&task.id, UPDATE_CHANNEL, serde_json::to_value(update)?)
                            .await?;
                    }
                    Some(TaskOutcome::Interrupted(interrupt)) => {
                        self.record(&task.id, INTERRUPT_CHANNEL, serde_json::to_value(interrupt)?)
                            .await?;
                        interrupts.push(interrupt.clone());
                    }
                    None => {}
                }
            }
            if !interrupts.is_empty() {
                return Ok(self.suspend(interrupts));
            }

            for task in &tasks {
                let update = match carried.remove(&task.id) {
                    Some(update) => update,
                    None => match outcomes.remove(&task.id) {
                        Some(TaskOutcome::Done(update)) => update,
                        _ => continue,
                    },
                };
                self.emit_with(|| StreamEvent::Update {
                    step: self.step,
                    node: task.node.clone(),
                    update: update.clone(),
                });
                self.state.apply(update);
            }
            self.emit_with(|| StreamEvent::Values {
                step: self.step,
                state: self.state.clone(),
            });

            self.steps_taken += 1;
            self.step += 1;

            let mut next = Vec::new();
            let mut scheduled = HashSet::new();
            for task in &tasks {
                route_from(&self.graph.graph, &self.state, &task.node, &mut next, &mut scheduled)?;
            }

            let stops: Vec<Interrupt> = tasks
                .iter()
                .filter(|t| self.graph.interrupt_after.contains(&t.node))
                .map(|t| Interrupt::static_point(&t.id, &t.node, InterruptKind::After))
                .collect();
            if !stops.is_empty() && !next.is_empty() {
                let nodes: Vec<&str> = stops.iter().map(|i| i.node.as_str()).collect();
                let metadata = self
                    .metadata()
                    .with_interrupt(InterruptKind::After)
                    .with_extra(INTERRUPT_NODES_KEY, json!(nodes));
                self.save(&next, metadata).await?;
                return Ok(self.suspend(stops));
            }

            tasks = next;
        }
    }
}

impl<S: GraphState> CompiledGraph<S> {
    /// `config` with the recursion limit raised to the graph's floor
    fn effective_config(&self, config: &RunConfig) -> RunConfig {
        let mut config = config.clone();
        if config.recursion_limit < self.min_recursion_limit {
            tracing::debug!(
                graph = %self.name,
                requested = config.recursion_limit,
                floor = self.min_recursion_limit,
                "raising recursion limit"
            );
            config.recursion_limit = self.min_recursion_limit;
        }
        config
    }

    /// Checkpoint address for `config`, or `None` when not persisting
    fn persistence(&self, config: &RunConfig) -> Result<Option<CheckpointConfig>> {
        match (&self.checkpointer, config.checkpoint_config()) {
            (Some(_), Some(address)) => Ok(Some(address)),
            (Some(_), None) => Err(GraphError::Configuration(format!(
                "graph '{}' has a checkpointer; RunConfig.thread_id is required",
                self.name
            ))),
            (None, _) => Ok(None),
        }
    }

    pub(crate) async fn execute_run(
        &self,
        input: S::Update,
        config: &RunConfig,
        events: Option<EventSender<S>>,
    ) -> Result<RunOutcome<S>> {
        let address = self.persistence(config)?;

        let (mut state, step, checkpoint) = match (&self.checkpointer, address) {
            (Some(saver), Some(address)) => match saver.get_tuple(&address).await? {
                Some(tuple) => (
                    serde_json::from_value::<S>(tuple.checkpoint.state)?,
                    step_from_i32(tuple.checkpoint.step),
                    Some(tuple.config),
                ),
                None if address.checkpoint_id.is_some() => {
                    return Err(GraphError::Configuration(format!(
                        "checkpoint {:?} not found",
                        address.checkpoint_id
                    )));
                }
                None => (S::default(), 0, Some(address)),
            },
            _ => (S::default(), 0, None),
        };
        state.apply(input);

        tracing::info!(
            graph = %self.name,
            thread_id = ?config.thread_id,
            step,
            "run started"
        );

        let run = RunLoop {
            graph: self.clone(),
            config: Arc::new(self.effective_config(config)),
            checkpoint,
            state,
            step,
            steps_taken: 0,
            events,
        };

        let mut tasks = Vec::new();
        let mut scheduled = HashSet::new();
        route_from(&run.graph.graph, &run.state, START, &mut tasks, &mut scheduled)?;
        run.drive(tasks, HashMap::new(), false).await
    }

    pub(crate) async fn execute_resume(
        &self,
        config: &RunConfig,
        command: Command<S::Update>,
        events: Option<EventSender<S>>,
    ) -> Result<RunOutcome<S>> {
        let saver = self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::Configuration(format!(
                "graph '{}' has no checkpointer; suspended runs cannot be resumed",
                self.name
            ))
        })?;
        let address = config.checkpoint_config().ok_or_else(|| {
            GraphError::Configuration("resume requires RunConfig.thread_id".to_string())
        })?;
        let tuple = saver.get_tuple(&address).await?.ok_or_else(|| {
            GraphError::Execution(format!("no checkpoint to resume for {:?}", address.thread_id))
        })?;

        let mut state: S = serde_json::from_value(tuple.checkpoint.state.clone())?;
        if let Some(update) = command.update {
            state.apply(update);
        }

        let mut tasks = Vec::with_capacity(tuple.checkpoint.tasks.len());
        let mut carried = HashMap::new();
        let mut answered = 0usize;
        for pending in &tuple.checkpoint.tasks {
            let mut task = Task::from_pending(pending.clone())?;
            for (_, channel, value) in tuple.writes_for(&pending.id) {
                match channel.as_str() {
                    UPDATE_CHANNEL => {
                        carried.insert(task.id.clone(), serde_json::from_value(value.clone())?);
                    }
                    INTERRUPT_CHANNEL => {
                        let interrupt: Interrupt = serde_json::from_value(value.clone())?;
                        if let Some(resume) = command.resume.as_ref().and_then(|r| r.value_for(&interrupt.id)) {
                            task.resume.push(resume);
                            answered += 1;
                        }
                    }
                    _ => {}
                }
            }
            tasks.push(task);
        }

        if command.resume.is_some() && answered == 0 {
            tracing::debug!(graph = %self.name, "resume value given but no dynamic interrupt is pending");
        }

        let skip_before = tuple.metadata.interrupt != Some(InterruptKind::After);
        let step = step_from_i32(tuple.checkpoint.step);

        tracing::info!(
            graph = %self.name,
            thread_id = ?config.thread_id,
            step,
            pending_tasks = tasks.len(),
            carried = carried.len(),
            "resuming run"
        );

        let run = RunLoop {
            graph: self.clone(),
            config: Arc::new(self.effective_config(config)),
            checkpoint: Some(tuple.config),
            state,
            step,
            steps_taken: 0,
            events,
        };
        run.drive(tasks, carried, skip_before).await
    }

    /// Run to completion with a default [`RunConfig`]
    ///
    /// A run that suspends on an interrupt is reported as
    /// [`GraphError::Interrupted`]; use
    /// [`invoke_with_config`](Self::invoke_with_config) for graphs that
    /// interrupt.
    pub async fn invoke(&self, input: S::Update) -> Result<S> {
        match self.invoke_with_config(input, &RunConfig::default()).await? {
            RunOutcome::Complete(state) => Ok(state),
            RunOutcome::Interrupted { interrupts, .. } => {
                let node = interrupts
                    .first()
                    .map(|i| i.node.clone())
                    .unwrap_or_default();
                Err(GraphError::interrupted(
                    node,
                    "waiting for human input; run with a thread and resume",
                ))
            }
        }
    }

    /// Run with `config`, starting from the thread's latest checkpoint when
    /// a checkpointer is attached
    ///
    /// `input` is merged into the loaded (or default) state before the
    /// first superstep.
    #[tracing::instrument(skip(self, input, config), fields(graph = %self.name))]
    pub async fn invoke_with_config(
        &self,
        input: S::Update,
        config: &RunConfig,
    ) -> Result<RunOutcome<S>> {
        self.execute_run(input, config, None).await
    }

    /// Continue a suspended run
    ///
    /// `command.update` is merged into the saved state first. Tasks that
    /// finished before the suspension keep their saved updates; suspended
    /// tasks run again and receive the resume value from
    /// [`NodeContext::interrupt`].
    #[tracing::instrument(skip(self, config, command), fields(graph = %self.name))]
    pub async fn resume(
        &self,
        config: &RunConfig,
        command: Command<S::Update>,
    ) -> Result<RunOutcome<S>> {
        self.execute_resume(config, command, None).await
    }
}
