//! Document relevance filtering
//!
//! Retrieval returns candidates; a [`DocumentGrader`] decides which of them
//! actually bear on the question. Every document is graded independently,
//! so [`filter_relevant`] grades up to `concurrency` documents at once and
//! still returns the survivors in their original order.
//!
//! An empty result is not an error: graphs route it to their "no relevant
//! documents" path.
//!
//! When retrieval fans out over several rewrites of one question the same
//! chunk tends to come back many times. [`dedup_top_k`] keeps the `k`
//! chunks retrieved most often, so grading calls are spent on them first:
//!
//! ```text
//!   rewrite 1 ─▶ [a, b, c]
//!   rewrite 2 ─▶ [b, c, d]      counts: b=3 c=2 a=1 d=1 e=1
//!   rewrite 3 ─▶ [b, e]         top-3:  [b, c, a]   (ties by first sighting)
//! ```

use crate::error::Result;
use crate::llm::{with_structured_output, ChatModel, StructuredOutput};
use crate::messages::Message;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Number of documents kept by query-expansion retrieval
pub const DEFAULT_TOP_K: usize = 5;

/// A retrieved chunk of text
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `source` metadata, if set
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// Join document contents for a prompt
pub fn format_docs(docs: &[Document]) -> String {
    docs.iter()
        .map(|d| d.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Decides whether one document is relevant to a question
#[async_trait]
pub trait DocumentGrader: Send + Sync {
    async fn is_relevant(&self, question: &str, document: &Document) -> Result<bool>;
}

/// Keep the documents `grader` accepts, in their original order
///
/// At most `concurrency` grading calls run at once (at least one). The
/// first grader error is returned.
pub async fn filter_relevant(
    question: &str,
    docs: Vec<Document>,
    grader: &dyn DocumentGrader,
    concurrency: usize,
) -> Result<Vec<Document>> {
    let total = docs.len();
    let graded: Vec<(Document, bool)> = stream::iter(docs)
        .map(|doc| async move {
            let relevant = grader.is_relevant(question, &doc).await?;
            Ok::<_, crate::GraphError>((doc, relevant))
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let kept: Vec<Document> = graded
        .into_iter()
        .filter_map(|(doc, relevant)| relevant.then_some(doc))
        .collect();
    tracing::debug!(total, relevant = kept.len(), "documents graded");
    Ok(kept)
}

/// Deduplicate by content and keep the `k` most frequent documents
///
/// Ties are broken by the position of a content's first occurrence; the
/// first occurrence is the one returned.
pub fn dedup_top_k(docs: impl IntoIterator<Item = Document>, k: usize) -> Vec<Document> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<(Document, usize)> = Vec::new();
    for doc in docs {
        match index.get(&doc.page_content) {
            Some(&i) => unique[i].1 += 1,
            None => {
                index.insert(doc.page_content.clone(), unique.len());
                unique.push((doc, 1));
            }
        }
    }
    // stable sort keeps first-seen order among equal counts
    unique.sort_by(|a, b| b.1.cmp(&a.1));
    unique.into_iter().take(k).map(|(doc, _)| doc).collect()
}

/// `{"binary_score": "yes" | "no"}` answer of a yes/no grader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryScore {
    pub binary_score: String,
}

impl BinaryScore {
    pub fn is_yes(&self) -> bool {
        self.binary_score.trim().eq_ignore_ascii_case("yes")
    }

    /// JSON schema for [`with_structured_output`]
    pub fn schema(description: &str) -> Value {
        json!({
            "type": "object",
            "properties": {
                "binary_score": {
                    "type": "string",
                    "enum": ["yes", "no"],
                    "description": description,
                }
            },
            "required": ["binary_score"]
        })
    }
}

const GRADER_PROMPT: &str = "You are a grader assessing relevance of a retrieved document to a user question. \
If the document contains keywords or meaning related to the question, grade it as relevant. \
The goal is to filter out erroneous retrievals; the test does not need to be stringent. \
Answer with a binary score 'yes' or 'no'.";

/// Grades relevance with a chat model
#[derive(Clone)]
pub struct LlmDocumentGrader {
    grader: StructuredOutput<BinaryScore>,
    prompt: String,
}

impl LlmDocumentGrader {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        let schema = BinaryScore::schema("Documents are relevant to the question, 'yes' or 'no'");
        Self {
            grader: with_structured_output(model, "GradeDocuments", schema).with_temperature(0.0),
            prompt: GRADER_PROMPT.to_string(),
        }
    }

    /// Replace the system prompt
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl DocumentGrader for LlmDocumentGrader {
    async fn is_relevant(&self, question: &str, document: &Document) -> Result<bool> {
        let score = self
            .grader
            .invoke(vec![
                Message::system(self.prompt.clone()),
                Message::human(format!(
                    "Retrieved document:\n\n{}\n\nUser question: {}",
                    document.page_content, question
                )),
            ])
            .await?;
        Ok(score.is_yes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedChatModel;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Relevant when the document mentions any word of the question
    struct KeywordGrader;

    #[async_trait]
    impl DocumentGrader for KeywordGrader {
        async fn is_relevant(&self, question: &str, document: &Document) -> Result<bool> {
            let content = document.page_content.to_lowercase();
            Ok(question
                .split_whitespace()
                .any(|word| content.contains(&word.to_lowercase())))
        }
    }

    /// Slower for earlier documents, to scramble completion order
    struct SlowFirstGrader {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DocumentGrader for SlowFirstGrader {
        async fn is_relevant(&self, _question: &str, document: &Document) -> Result<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let n: u64 = document.page_content.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50 - n * 10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(n % 2 == 0)
        }
    }

    fn docs(contents: &[&str]) -> Vec<Document> {
        contents.iter().map(|c| Document::new(*c)).collect()
    }

    #[tokio::test]
    async fn test_filter_keeps_order() {
        let grader = SlowFirstGrader {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let kept = filter_relevant("q", docs(&["0", "1", "2", "3", "4"]), &grader, 3)
            .await
            .unwrap();
        assert_eq!(kept, docs(&["0", "2", "4"]));
        assert!(grader.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_filter_empty_input() {
        let kept = filter_relevant("What is X?", Vec::new(), &KeywordGrader, 4).await.unwrap();
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn test_filter_is_idempotent() {
        let input = docs(&["agents use tools", "cooking pasta", "memory for agents", "weather"]);
        let once = filter_relevant("agents", input, &KeywordGrader, 2).await.unwrap();
        let twice = filter_relevant("agents", once.clone(), &KeywordGrader, 2).await.unwrap();
        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dedup_top_k_counts_and_ties() {
        let retrieved = docs(&["a", "b", "c", "b", "c", "d", "b", "e"]);
        let top: Vec<_> = dedup_top_k(retrieved, 3)
            .into_iter()
            .map(|d| d.page_content)
            .collect();
        assert_eq!(top, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_metadata() {
        let retrieved = vec![
            Document::new("x").with_metadata("source", "first.txt"),
            Document::new("x").with_metadata("source", "second.txt"),
        ];
        let top = dedup_top_k(retrieved, DEFAULT_TOP_K);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].source(), Some("first.txt"));
    }

    #[tokio::test]
    async fn test_llm_grader() {
        let model = ScriptedChatModel::from_fn(|request| {
            let text = &request.messages[1].content;
            let score = if text.contains("agent") { "yes" } else { "no" };
            Ok(Message::ai(format!("{{\"binary_score\": \"{}\"}}", score)))
        });
        let grader = LlmDocumentGrader::new(Arc::new(model));
        let kept = filter_relevant(
            "what is an agent?",
            docs(&["an agent plans", "a recipe"]),
            &grader,
            2,
        )
        .await
        .unwrap();
        assert_eq!(kept, docs(&["an agent plans"]));
    }

    proptest! {
        #[test]
        fn prop_dedup_is_bounded_and_unique(
            contents in proptest::collection::vec("[a-e]", 0..30),
            k in 0usize..8,
        ) {
            let input: Vec<Document> = contents.iter().map(|c| Document::new(c.clone())).collect();
            let top = dedup_top_k(input, k);
            let mut seen: Vec<&str> = top.iter().map(|d| d.page_content.as_str()).collect();
            prop_assert!(top.len() <= k);
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), top.len());
        }
    }
}
