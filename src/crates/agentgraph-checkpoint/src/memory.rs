//! In-memory checkpoint saver
//!
//! Keeps every checkpoint of every thread in process memory. Snapshots are
//! encoded with a [`SerializerProtocol`] on write and decoded on read, so a
//! tuple handed back by [`get_tuple`](CheckpointSaver::get_tuple) never
//! aliases the state of a running graph.
//!
//! Suited to tests, the CLI and single-process deployments; everything is
//! lost when the process exits.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, PendingWrite},
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CheckpointEntry {
    id: String,
    checkpoint: Vec<u8>,
    metadata: CheckpointMetadata,
    parent_id: Option<String>,
    writes: Vec<PendingWrite>,
}

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointEntry>>>>;

/// Checkpoint saver backed by a map of thread id to checkpoint history
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver<S: SerializerProtocol = JsonSerializer> {
    storage: CheckpointStorage,
    serializer: S,
}

impl InMemoryCheckpointSaver<JsonSerializer> {
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer::new())
    }
}

impl<S: SerializerProtocol> InMemoryCheckpointSaver<S> {
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            serializer,
        }
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    fn to_tuple(&self, thread_id: &str, entry: &CheckpointEntry) -> Result<CheckpointTuple> {
        Ok(CheckpointTuple {
            config: CheckpointConfig::for_thread(thread_id).with_checkpoint_id(entry.id.clone()),
            checkpoint: self.serializer.loads(&entry.checkpoint)?,
            metadata: entry.metadata.clone(),
            pending_writes: entry.writes.clone(),
            parent_config: entry
                .parent_id
                .as_ref()
                .map(|id| CheckpointConfig::for_thread(thread_id).with_checkpoint_id(id.clone())),
        })
    }
}

impl Default for InMemoryCheckpointSaver<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: SerializerProtocol + 'static> CheckpointSaver for InMemoryCheckpointSaver<S> {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config
            .thread_id
            .as_ref()
            .ok_or_else(CheckpointError::missing_thread_id)?;

        let storage = self.storage.read().await;
        let Some(entries) = storage.get(thread_id) else {
            return Ok(None);
        };

        let entry = match &config.checkpoint_id {
            Some(checkpoint_id) => entries.iter().find(|e| &e.id == checkpoint_id),
            None => entries.last(),
        };

        entry.map(|e| self.to_tuple(thread_id, e)).transpose()
    }

    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;

        let mut thread_ids: Vec<String> = match config.and_then(|c| c.thread_id.clone()) {
            Some(thread_id) => vec![thread_id],
            None => storage.keys().cloned().collect(),
        };
        thread_ids.sort();

        let limit = limit.unwrap_or(usize::MAX);
        let mut results = Vec::new();

        'threads: for thread_id in thread_ids {
            let Some(entries) = storage.get(&thread_id) else {
                continue;
            };

            // History is append-only, so position is age.
            let cutoff = before
                .and_then(|b| b.checkpoint_id.as_ref())
                .and_then(|id| entries.iter().position(|e| &e.id == id))
                .unwrap_or(entries.len());

            for entry in entries[..cutoff].iter().rev() {
                if results.len() >= limit {
                    break 'threads;
                }
                results.push(self.to_tuple(&thread_id, entry));
            }
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config
            .thread_id
            .clone()
            .ok_or_else(CheckpointError::missing_thread_id)?;

        let entry = CheckpointEntry {
            id: checkpoint.id.clone(),
            checkpoint: self.serializer.dumps(&checkpoint)?,
            metadata,
            parent_id: config.checkpoint_id.clone(),
            writes: Vec::new(),
        };

        let mut storage = self.storage.write().await;
        storage.entry(thread_id.clone()).or_default().push(entry);

        tracing::trace!(thread_id = %thread_id, checkpoint_id = %checkpoint.id, "checkpoint stored");

        Ok(CheckpointConfig::for_thread(thread_id).with_checkpoint_id(checkpoint.id))
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, serde_json::Value)>,
        task_id: String,
    ) -> Result<()> {
        let thread_id = config
            .thread_id
            .as_ref()
            .ok_or_else(CheckpointError::missing_thread_id)?;
        let checkpoint_id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))?;

        let mut storage = self.storage.write().await;
        let entry = storage
            .get_mut(thread_id)
            .and_then(|entries| entries.iter_mut().find(|e| &e.id == checkpoint_id))
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.clone()))?;

        // A task rewriting a channel replaces its earlier write.
        for (channel, value) in writes {
            entry
                .writes
                .retain(|(id, ch, _)| !(id == &task_id && ch == &channel));
            entry.writes.push((task_id.clone(), channel, value));
        }

        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointSource, PendingTask, UPDATE_CHANNEL};
    use futures::StreamExt;
    use serde_json::json;

    async fn put_step(
        saver: &InMemoryCheckpointSaver,
        config: &CheckpointConfig,
        step: i32,
    ) -> CheckpointConfig {
        let checkpoint = Checkpoint::new(step, json!({"step": step}), vec![]);
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Loop)
            .with_step(step);
        saver.put(config, checkpoint, metadata).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let saver = InMemoryCheckpointSaver::new();
        let thread = CheckpointConfig::for_thread("thread-1");

        let first = put_step(&saver, &thread, 0).await;
        let second = put_step(&saver, &first, 1).await;

        let latest = saver.get_tuple(&thread).await.unwrap().unwrap();
        assert_eq!(latest.config, second);
        assert_eq!(latest.checkpoint.state, json!({"step": 1}));
        assert_eq!(latest.parent_config, Some(first.clone()));

        let older = saver.get_tuple(&first).await.unwrap().unwrap();
        assert_eq!(older.checkpoint.step, 0);
        assert!(older.parent_config.is_none());
    }

    #[tokio::test]
    async fn test_missing_thread_id_is_invalid() {
        let saver = InMemoryCheckpointSaver::new();
        let err = saver.get_tuple(&CheckpointConfig::new()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_unknown_thread_returns_none() {
        let saver = InMemoryCheckpointSaver::new();
        let tuple = saver
            .get_tuple(&CheckpointConfig::for_thread("nobody"))
            .await
            .unwrap();
        assert!(tuple.is_none());
    }

    #[tokio::test]
    async fn test_returned_checkpoint_is_a_copy() {
        let saver = InMemoryCheckpointSaver::new();
        let thread = CheckpointConfig::for_thread("t");
        put_step(&saver, &thread, 0).await;

        let mut tuple = saver.get_tuple(&thread).await.unwrap().unwrap();
        tuple.checkpoint.state = json!("mutated");

        let again = saver.get_tuple(&thread).await.unwrap().unwrap();
        assert_eq!(again.checkpoint.state, json!({"step": 0}));
    }

    #[tokio::test]
    async fn test_put_writes_replaces_same_channel() {
        let saver = InMemoryCheckpointSaver::new();
        let thread = CheckpointConfig::for_thread("t");
        let task = PendingTask::new("grade");
        let checkpoint = Checkpoint::new(0, json!({}), vec![task.clone()]);
        let config = saver
            .put(&thread, checkpoint, CheckpointMetadata::new())
            .await
            .unwrap();

        saver
            .put_writes(&config, vec![(UPDATE_CHANNEL.into(), json!(1))], task.id.clone())
            .await
            .unwrap();
        saver
            .put_writes(&config, vec![(UPDATE_CHANNEL.into(), json!(2))], task.id.clone())
            .await
            .unwrap();

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        let writes: Vec<_> = tuple.writes_for(&task.id).collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2, json!(2));
    }

    #[tokio::test]
    async fn test_put_writes_requires_existing_checkpoint() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::for_thread("t").with_checkpoint_id("missing");
        let err = saver
            .put_writes(&config, vec![], "task".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_before_and_limit() {
        let saver = InMemoryCheckpointSaver::new();
        let thread = CheckpointConfig::for_thread("t");
        let mut config = thread.clone();
        let mut configs = Vec::new();
        for step in 0..4 {
            config = put_step(&saver, &config, step).await;
            configs.push(config.clone());
        }

        let steps: Vec<i32> = saver
            .list(Some(&thread), Some(&configs[3]), Some(2))
            .await
            .unwrap()
            .map(|t| t.unwrap().checkpoint.step)
            .collect()
            .await;
        assert_eq!(steps, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let saver = InMemoryCheckpointSaver::new();
        put_step(&saver, &CheckpointConfig::for_thread("a"), 0).await;
        put_step(&saver, &CheckpointConfig::for_thread("b"), 0).await;
        assert_eq!(saver.thread_count().await, 2);

        saver.delete_thread("a").await.unwrap();
        assert_eq!(saver.thread_count().await, 1);
        assert_eq!(saver.checkpoint_count().await, 1);
    }
}
