//! Retrieval-augmented generation agents
//!
//! | agent | flow |
//! |-------|------|
//! | [`simple`] | retrieve → generate |
//! | [`corrective`] | retrieve → grade documents → generate ⇄ grade hallucinations |
//! | [`query_expansion`] | rewrite → fan-out retrieve → dedup top-k → grade → (human feedback) → generate ⇄ grade → memory |
//! | [`memory_hil`] | retrieve → grade → generate (asks the human for context) ⇄ grade → memory |
//!
//! Every generating agent bounds its hallucination loop the same way: the
//! generate node counts attempts, a grading node records whether the
//! answer is grounded, and a pure router maps `(attempts, grounded)` to
//! `accept`, `retry` or `exhausted` with [`route_grade`]. An exhausted loop
//! goes through `give_up`, which applies the configured
//! [`ExhaustionPolicy`]: fail the run, or keep the last answer marked
//! unverified.
//!
//! [`route_grade`]: agentgraph_core::route_grade

pub mod corrective;
pub mod memory_hil;
pub mod query_expansion;
pub mod simple;

use agentgraph_core::generation::{AbortReason, Generation, DEFAULT_MAX_ATTEMPTS};
use agentgraph_core::llm::{with_structured_output, ChatModel, StructuredOutput};
use agentgraph_core::relevance::{format_docs, BinaryScore, DEFAULT_TOP_K};
use agentgraph_core::{Document, DocumentGrader, ExhaustionPolicy, LoopOutcome, Message, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub use corrective::{create_corrective_rag, CorrectiveRag, CorrectiveRagState, CorrectiveRagUpdate};
pub use memory_hil::{create_memory_hil_rag, MemoryHilRag, MemoryHilState, MemoryHilUpdate};
pub use query_expansion::{QueryExpansionRag, QueryExpansionState, QueryExpansionUpdate};
pub use simple::{create_simple_rag, SimpleRagState, SimpleRagUpdate};

pub const RAG_PROMPT: &str = "You are an assistant for question-answering tasks.
Use the following pieces of retrieved context to answer the question.
If you don't know the answer, just say that you don't know.
Use three sentences maximum and keep the answer concise.

Question: {question}
Context: {context}
Answer:";

pub const RAG_PROMPT_WITH_CHAT_HISTORY: &str = "You are an assistant for question-answering tasks.
Use the following pieces of retrieved context to answer the latest question in the conversation.
If you don't know the answer, just say that you don't know.
The pre-existing conversation may provide important context to the question.
Use three sentences maximum and keep the answer concise.

Existing Conversation:
{conversation}

Latest Question:
{question}

Additional Context from Documents:
{context}

Answer:";

const HALLUCINATION_PROMPT: &str = "You are a grader assessing whether an LLM generation is grounded in / supported by a set of retrieved facts.
Give a binary score 'yes' or 'no'. 'Yes' means that the answer is grounded in / supported by the set of facts.";

const CONVERSATION_GRADER_PROMPT: &str = "You are a grader assessing relevance of a retrieved document to a conversation between a user and an AI assistant, and user's latest question.
If the document contains keyword(s) or semantic meaning related to the user question, definitely grade it as relevant.
It does not need to be a stringent test. The goal is to filter out erroneous retrievals that are not relevant at all.
Give a binary score 'yes' or 'no' score to indicate whether the document is relevant to the question.";

/// Labels of the document-grading router
pub const SOME_RELEVANT: &str = "some relevant";
pub const NONE_RELEVANT: &str = "none relevant";

/// Limits shared by the RAG agents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RagOptions {
    /// Generations allowed before the loop is exhausted
    pub max_attempts: u32,
    pub exhaustion: ExhaustionPolicy,
    /// Documents kept after deduplicating fan-out retrieval
    pub top_k: usize,
    /// Rewrites of the question for query expansion
    pub num_rewrites: usize,
    /// Relevance grading calls in flight at once
    pub grading_concurrency: usize,
}

/// Supersteps outside the hallucination loop, for the longest RAG graph:
/// rewrite, retrieve, grade documents, human feedback, give up and memory
const FIXED_STEPS: usize = 6;

impl RagOptions {
    /// Supersteps a run needs to exhaust `max_attempts`
    ///
    /// Every attempt is a generate step and a grade step, so a recursion
    /// limit below this stops the run before [`give_up`] can apply the
    /// exhaustion policy.
    pub fn recursion_limit(&self) -> usize {
        FIXED_STEPS + 2 * self.max_attempts as usize
    }
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            exhaustion: ExhaustionPolicy::FailClosed,
            top_k: DEFAULT_TOP_K,
            num_rewrites: 3,
            grading_concurrency: 4,
        }
    }
}

/// `RAG_PROMPT` filled in
pub fn rag_prompt(question: &str, docs: &[Document]) -> String {
    RAG_PROMPT
        .replace("{context}", &format_docs(docs))
        .replace("{question}", question)
}

/// `RAG_PROMPT_WITH_CHAT_HISTORY` filled in
pub fn rag_prompt_with_history(conversation: &str, question: &str, docs: &[Document]) -> String {
    RAG_PROMPT_WITH_CHAT_HISTORY
        .replace("{context}", &format_docs(docs))
        .replace("{conversation}", conversation)
        .replace("{question}", question)
}

/// Single-turn answer from `model`
pub(crate) async fn generate(model: &dyn ChatModel, prompt: String) -> Result<String> {
    Ok(model.invoke(vec![Message::human(prompt)]).await?.content)
}

/// Checks that an answer is supported by the documents it was generated from
#[derive(Clone)]
pub struct HallucinationGrader {
    grader: StructuredOutput<BinaryScore>,
}

impl HallucinationGrader {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        let schema = BinaryScore::schema("Answer is grounded in the facts, 'yes' or 'no'");
        Self {
            grader: with_structured_output(model, "GradeHallucinations", schema).with_temperature(0.0),
        }
    }

    pub async fn is_grounded(&self, docs: &[Document], generation: &str) -> Result<bool> {
        let score = self
            .grader
            .invoke(vec![
                Message::system(HALLUCINATION_PROMPT),
                Message::human(format!(
                    "Set of facts: \n\n {} \n\n LLM generation: {}",
                    format_docs(docs),
                    generation
                )),
            ])
            .await?;
        tracing::debug!(grounded = score.is_yes(), "hallucination graded");
        Ok(score.is_yes())
    }
}

/// Relevance grader that also sees the conversation so far
pub struct ConversationGrader {
    grader: StructuredOutput<BinaryScore>,
    conversation: String,
}

impl ConversationGrader {
    pub fn new(model: Arc<dyn ChatModel>, conversation: impl Into<String>) -> Self {
        let schema = BinaryScore::schema("Documents are relevant to the question, 'yes' or 'no'");
        Self {
            grader: with_structured_output(model, "GradeDocuments", schema).with_temperature(0.0),
            conversation: conversation.into(),
        }
    }
}

#[async_trait]
impl DocumentGrader for ConversationGrader {
    async fn is_relevant(&self, question: &str, document: &Document) -> Result<bool> {
        let score = self
            .grader
            .invoke(vec![
                Message::system(CONVERSATION_GRADER_PROMPT),
                Message::human(format!(
                    "Here is the retrieved document: \n\n {} \n\n Here is the conversation so far: \n\n {} \n\n Here is the user question: \n\n {}",
                    document.page_content, self.conversation, question
                )),
            ])
            .await?;
        Ok(score.is_yes())
    }
}

/// Apply `policy` to an answer that never passed grading
///
/// Returns the answer to keep, unverified, or `RetryExhausted`.
pub(crate) fn give_up(generation: Option<String>, attempts: u32, policy: ExhaustionPolicy) -> Result<Option<String>> {
    let outcome = LoopOutcome::Aborted {
        last: generation,
        attempts,
        reason: AbortReason::Exhausted("generation is not grounded in the retrieved documents".to_string()),
    };
    match outcome.resolve(policy)? {
        Generation::Verified(answer) | Generation::Unverified(answer) => {
            tracing::warn!(attempts, "keeping unverified generation");
            Ok(Some(answer))
        }
    }
}

/// Router label for the document-grading step
pub(crate) fn decide_to_generate(documents: &[Document]) -> &'static str {
    if documents.is_empty() {
        tracing::debug!("no relevant documents");
        NONE_RELEVANT
    } else {
        SOME_RELEVANT
    }
}
