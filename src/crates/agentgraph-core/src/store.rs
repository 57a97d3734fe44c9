//! Long-term store shared across threads
//!
//! Checkpoints hold the state of *one* conversation thread. A [`Store`]
//! holds data that outlives threads, such as a user's saved preferences,
//! and is addressed by a hierarchical namespace plus a key:
//!
//! ```text
//!   ("memory_profile", "user-42") / "user_memory"  ──▶ {"music_preferences": [..]}
//!   ("memories", "user-42")       / "note-1"       ──▶ {"text": ".."}
//! ```
//!
//! Nodes reach the store through
//! [`NodeContext::store`](crate::NodeContext::store); attach one with
//! [`CompileOptions::with_store`](crate::CompileOptions::with_store).
//!
//! # Example
//!
//! ```rust
//! use agentgraph_core::store::{InMemoryStore, Store};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> agentgraph_core::store::Result<()> {
//! let store = InMemoryStore::new();
//! let ns = vec!["memories".to_string(), "user-1".to_string()];
//!
//! store.put(&ns, "favorite", json!({"text": "likes jazz"})).await?;
//! let item = store.get(&ns, "favorite").await?.unwrap();
//! assert_eq!(item.value["text"], "likes jazz");
//!
//! let hits = store.search(&["memories".to_string()], Some("jazz"), 10).await?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Store error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Namespace path, outermost segment first
pub type Namespace = Vec<String>;

/// A stored value with its address and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Namespace,
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Namespaced key-value storage
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Item>>;

    /// Insert or replace; `created_at` survives replacement
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()>;

    /// Remove a key; true when it existed
    async fn delete(&self, namespace: &[String], key: &str) -> Result<bool>;

    /// Items under `prefix` (any depth), most recently updated first
    ///
    /// With a `query`, items are ranked by how many distinct query terms
    /// their serialized value contains (case-insensitive); items matching
    /// none are dropped.
    async fn search(&self, prefix: &[String], query: Option<&str>, limit: usize) -> Result<Vec<Item>>;

    /// Distinct namespaces under `prefix`, sorted
    async fn list_namespaces(&self, prefix: &[String]) -> Result<Vec<Namespace>>;
}

fn check_namespace(namespace: &[String]) -> Result<()> {
    if namespace.is_empty() {
        return Err(StoreError::InvalidNamespace("namespace must not be empty".to_string()));
    }
    if let Some(bad) = namespace.iter().find(|s| s.is_empty() || s.contains('.')) {
        return Err(StoreError::InvalidNamespace(format!(
            "segment '{}' must be non-empty and contain no '.'",
            bad
        )));
    }
    Ok(())
}

/// Process-local store, for development and tests
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<BTreeMap<Namespace, HashMap<String, Item>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items across all namespaces
    pub fn len(&self) -> usize {
        self.data.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Item>> {
        check_namespace(namespace)?;
        Ok(self
            .data
            .read()
            .get(namespace)
            .and_then(|items| items.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        check_namespace(namespace)?;
        let now = Utc::now();
        let mut data = self.data.write();
        let items = data.entry(namespace.to_vec()).or_default();
        let created_at = items.get(key).map_or(now, |existing| existing.created_at);
        items.insert(
            key.to_string(),
            Item {
                namespace: namespace.to_vec(),
                key: key.to_string(),
                value,
                created_at,
                updated_at: now,
            },
        );
        tracing::trace!(namespace = ?namespace, key, "store item written");
        Ok(())
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<bool> {
        check_namespace(namespace)?;
        let mut data = self.data.write();
        let removed = data
            .get_mut(namespace)
            .map_or(false, |items| items.remove(key).is_some());
        if data.get(namespace).map_or(false, HashMap::is_empty) {
            data.remove(namespace);
        }
        Ok(removed)
    }

    async fn search(&self, prefix: &[String], query: Option<&str>, limit: usize) -> Result<Vec<Item>> {
        let mut terms: Vec<String> = query
            .map(|q| {
                q.split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();
        terms.sort();
        terms.dedup();

        let data = self.data.read();
        let mut hits: Vec<(usize, Item)> = Vec::new();
        for (namespace, items) in data.iter() {
            if !namespace.starts_with(prefix) {
                continue;
            }
            for item in items.values() {
                let score = if terms.is_empty() {
                    0
                } else {
                    let text = item.value.to_string().to_lowercase();
                    let matched = terms.iter().filter(|term| text.contains(term.as_str())).count();
                    if matched == 0 {
                        continue;
                    }
                    matched
                };
                hits.push((score, item.clone()));
            }
        }

        hits.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(hits.into_iter().take(limit).map(|(_, item)| item).collect())
    }

    async fn list_namespaces(&self, prefix: &[String]) -> Result<Vec<Namespace>> {
        Ok(self
            .data
            .read()
            .keys()
            .filter(|ns| ns.starts_with(prefix))
            .cloned()
            .collect())
    }
}
