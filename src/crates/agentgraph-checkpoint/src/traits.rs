//! Storage backend trait for checkpoints
//!
//! Any persistence layer that can keep an ordered history of snapshots per
//! thread can back a graph by implementing [`CheckpointSaver`]. The graph
//! executor only needs four things from it:
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │  executor                       CheckpointSaver   │
//! │                                                   │
//! │  before superstep ──── put ────────▶ snapshot     │
//! │  task finished    ──── put_writes ─▶ writes       │
//! │  resume / state   ──── get_tuple ──▶ latest       │
//! │  history          ──── list ───────▶ newest first │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Implementations must be `Send + Sync`; one saver is shared by every run of
//! a compiled graph.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::Result,
};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Async stream of checkpoint tuples, newest first
pub type CheckpointStream =
    Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Persistence backend for graph checkpoints
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch only the checkpoint addressed by `config`
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Fetch a checkpoint with its metadata and pending writes
    ///
    /// When `config.checkpoint_id` is `None` the latest checkpoint of the
    /// thread is returned.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints, newest first
    ///
    /// * `config` - restrict to one thread; `None` lists all threads
    /// * `before` - only checkpoints older than this one
    /// * `limit` - maximum number of results
    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Store a checkpoint and return the config that addresses it
    ///
    /// `config.checkpoint_id`, when set, names the parent checkpoint.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Record writes produced by `task_id` against the checkpoint in `config`
    ///
    /// Each write is `(channel, value)`.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, serde_json::Value)>,
        task_id: String,
    ) -> Result<()>;

    /// Delete every checkpoint and write of a thread
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
