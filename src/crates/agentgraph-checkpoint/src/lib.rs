//! # agentgraph-checkpoint - Persistence for graph runs
//!
//! Checkpoints are snapshots of a graph run taken at superstep boundaries.
//! They are what makes a run resumable: when a node suspends for human
//! input, the executor stores the state, the pending tasks and the writes of
//! every task that already finished, and a later call picks up exactly
//! there.
//!
//! ## Contents
//!
//! - [`Checkpoint`], [`PendingTask`], [`CheckpointMetadata`],
//!   [`CheckpointConfig`], [`CheckpointTuple`] - the data model
//! - [`CheckpointSaver`] - the storage trait a backend implements
//! - [`InMemoryCheckpointSaver`] - a process-local backend
//! - [`SerializerProtocol`] / [`JsonSerializer`] - snapshot encoding
//!
//! ## Example
//!
//! ```rust
//! use agentgraph_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
//!     InMemoryCheckpointSaver,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> agentgraph_checkpoint::Result<()> {
//! let saver = InMemoryCheckpointSaver::new();
//! let thread = CheckpointConfig::for_thread("session-1");
//!
//! let checkpoint = Checkpoint::new(0, json!({"question": "What is X?"}), vec![]);
//! let saved = saver.put(&thread, checkpoint, CheckpointMetadata::new()).await?;
//!
//! let latest = saver.get_tuple(&thread).await?.expect("stored");
//! assert_eq!(latest.config, saved);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, InterruptKind, PendingTask, PendingWrite, INTERRUPT_CHANNEL, UPDATE_CHANNEL,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::{CheckpointSaver, CheckpointStream};
