//! Document retrieval for the RAG agents
//!
//! A [`Retriever`] turns a query into candidate [`Document`]s. Two are
//! provided:
//!
//! - [`InMemoryRetriever`] scores a fixed document set with tf-idf over
//!   lower-cased terms
//! - [`StoreRetriever`] searches a namespace of the long-term [`Store`],
//!   where [`index_documents`] put the chunks
//!
//! [`load_documents`] reads `.txt` and `.md` files from a directory and
//! splits them with [`split_text`].

use crate::error::{AgentError, Result};
use agentgraph_core::{Document, Store};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Documents returned per query when not configured
pub const DEFAULT_RETRIEVAL_K: usize = 4;

/// Chunk size, in characters, used by [`load_documents`]
pub const DEFAULT_CHUNK_SIZE: usize = 800;

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

pub(crate) fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// tf-idf retriever over documents held in memory
#[derive(Debug, Clone)]
pub struct InMemoryRetriever {
    docs: Vec<Document>,
    term_counts: Vec<HashMap<String, usize>>,
    idf: HashMap<String, f64>,
    k: usize,
}

impl InMemoryRetriever {
    pub fn new(docs: Vec<Document>) -> Self {
        let term_counts: Vec<HashMap<String, usize>> = docs
            .iter()
            .map(|doc| {
                let mut counts = HashMap::new();
                for term in terms(&doc.page_content) {
                    *counts.entry(term).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for counts in &term_counts {
            for term in counts.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let n = docs.len() as f64;
        let idf = document_frequency
            .into_iter()
            .map(|(term, df)| (term, ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0))
            .collect();

        Self {
            docs,
            term_counts,
            idf,
            k: DEFAULT_RETRIEVAL_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn score(&self, index: usize, query_terms: &HashSet<String>) -> f64 {
        let counts = &self.term_counts[index];
        let length = counts.values().sum::<usize>().max(1) as f64;
        query_terms
            .iter()
            .filter_map(|term| {
                let tf = *counts.get(term)? as f64;
                Some((1.0 + tf.ln()) * self.idf.get(term).copied().unwrap_or(0.0))
            })
            .sum::<f64>()
            / length.sqrt()
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let query_terms: HashSet<String> = terms(query).into_iter().collect();
        let mut scored: Vec<(usize, f64)> = (0..self.docs.len())
            .map(|i| (i, self.score(i, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // ties keep document order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(scored
            .into_iter()
            .take(self.k)
            .map(|(i, _)| self.docs[i].clone())
            .collect())
    }
}

/// Retriever over a namespace of the long-term store
#[derive(Clone)]
pub struct StoreRetriever {
    store: Arc<dyn Store>,
    namespace: Vec<String>,
    k: usize,
}

impl StoreRetriever {
    pub fn new(store: Arc<dyn Store>, namespace: Vec<String>) -> Self {
        Self {
            store,
            namespace,
            k: DEFAULT_RETRIEVAL_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
}

/// Read a document back from a stored value
fn to_document(value: Value) -> Document {
    match value {
        Value::String(text) => Document::new(text),
        Value::Object(_) if value.get("page_content").is_some() => {
            serde_json::from_value(value.clone()).unwrap_or_else(|_| Document::new(value.to_string()))
        }
        other => Document::new(other.to_string()),
    }
}

#[async_trait]
impl Retriever for StoreRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let items = self.store.search(&self.namespace, Some(query), self.k).await?;
        Ok(items.into_iter().map(|item| to_document(item.value)).collect())
    }
}

/// Put `docs` under `namespace` as `doc-0`, `doc-1`, ..
///
/// Returns the number of documents written, or 0 when the namespace
/// already holds documents.
pub async fn index_documents(store: &dyn Store, namespace: &[String], docs: &[Document]) -> Result<usize> {
    if !store.search(namespace, None, 1).await?.is_empty() {
        tracing::info!(namespace = ?namespace, "documents already indexed");
        return Ok(0);
    }
    for (i, doc) in docs.iter().enumerate() {
        store
            .put(namespace, &format!("doc-{}", i), serde_json::to_value(doc)?)
            .await?;
    }
    tracing::info!(namespace = ?namespace, count = docs.len(), "indexed documents");
    Ok(docs.len())
}

/// Split text into chunks of at most `chunk_size` characters
///
/// Chunks break at whitespace; a word longer than `chunk_size` is cut.
/// Consecutive chunks share up to `overlap` characters of whole words.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);

    let mut words: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(chunk_size) {
            words.push(piece.iter().collect());
        }
    }

    let length = |chunk: &[String]| -> usize {
        chunk.iter().map(|w| w.chars().count()).sum::<usize>() + chunk.len().saturating_sub(1)
    };

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for word in words {
        let added = word.chars().count() + usize::from(!current.is_empty());
        if !current.is_empty() && length(&current) + added > chunk_size {
            chunks.push(current.join(" "));
            let mut carried: Vec<String> = Vec::new();
            for previous in current.iter().rev() {
                let mut candidate = vec![previous.clone()];
                candidate.extend(carried.iter().cloned());
                if length(&candidate) > overlap || length(&candidate) + 1 + word.chars().count() > chunk_size {
                    break;
                }
                carried = candidate;
            }
            current = carried;
        }
        current.push(word);
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Load `.txt` and `.md` files from `dir`, split into chunks
///
/// Each chunk carries `source` (the file path) and `chunk` metadata.
/// Files are read in name order.
pub async fn load_documents(dir: impl AsRef<Path>, chunk_size: usize, overlap: usize) -> Result<Vec<Document>> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        AgentError::Retrieval(format!("cannot read documents directory {}: {}", dir.display(), e))
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "txt" | "md"))
            .unwrap_or(false);
        if wanted && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut docs = Vec::new();
    for path in paths {
        let text = tokio::fs::read_to_string(&path).await?;
        let source = path.display().to_string();
        for (i, chunk) in split_text(&text, chunk_size, overlap).into_iter().enumerate() {
            docs.push(
                Document::new(chunk)
                    .with_metadata("source", source.clone())
                    .with_metadata("chunk", i),
            );
        }
    }
    tracing::debug!(dir = %dir.display(), chunks = docs.len(), "loaded documents");
    Ok(docs)
}
