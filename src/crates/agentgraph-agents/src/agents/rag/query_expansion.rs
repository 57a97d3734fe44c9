//! Query-expansion RAG with a human fallback and conversation memory
//!
//! ```text
//!   START ─▶ generate_rewritten_queries ══Send×(1+n)══▶ retrieve_documents ─▶ grade_documents
//!                                                                              │         │
//!                                                                   (some relevant)  (none relevant)
//!                                                                              │         ▼
//!                                                                              │   human_feedback  ◀─ interrupt before
//!                                                                              ▼         │
//!                              ┌──────(retry)──── grade_hallucinations ◀── generate_response
//!                              │                       │          │
//!                              ▼                  (accept)   (exhausted)
//!                     generate_response                │          ▼
//!                                                      │       give_up
//!                                                      ▼          │
//!                                              configure_memory ◀─┘ ─▶ END
//! ```
//!
//! The question is rewritten `num_rewrites` times. Retrieval fans out over
//! the original and every rewrite; each branch first drafts a hypothetical
//! answer and searches with `"{question}: {sample answer}"`, which matches
//! answer-shaped chunks better than the bare question. The branches append
//! to `documents`; grading then keeps the `top_k` chunks retrieved most
//! often and replaces the list with the relevant ones.
//!
//! When nothing relevant is left the run stops before `human_feedback` so
//! a person can add context (messages or documents) with
//! [`CompiledGraph::update_state`] before resuming. This needs a
//! checkpointer.
//!
//! `configure_memory` appends the exchange to `messages`, then resets the
//! attempt counter and the documents, so the next question on the same
//! thread starts clean but sees the conversation.

use super::{
    decide_to_generate, generate, give_up, rag_prompt_with_history, ConversationGrader, HallucinationGrader,
    RagOptions, NONE_RELEVANT, SOME_RELEVANT,
};
use crate::retrieval::Retriever;
use agentgraph_core::llm::{with_structured_output, ChatModel, StructuredOutput};
use agentgraph_core::messages::get_buffer_string;
use agentgraph_core::state::{AddMessages, AppendOrOverwrite, ListUpdate, Overwrite};
use agentgraph_core::{
    dedup_top_k, filter_relevant, graph_state, route_grade, CheckpointSaver, CompileOptions, CompiledGraph, Document,
    Message, NodeContext, Result, Send, StateGraph, END, START,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const REWRITE_PROMPT: &str = "You are an analyst in charge of taking a user's question as input, and reframing and rewriting it in different ways.
Your goal is to change the phrasing of the question, while making sure that the intent and meaning of the question is the same.
Return a list of rewritten_queries. The number will be specified by the user.";

const SAMPLE_ANSWER_PROMPT: &str = "You are a novice in charge of taking a user's question as input, and generating a sample answer for it.
This sample answer should contain words that would likely be in a real answer, but is not grounded in any factual documents, the way a real answer would be.";

graph_state! {
    pub struct QueryExpansionState (QueryExpansionUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub question: String => Overwrite,
        pub rewritten_queries: Vec<String> => Overwrite,
        pub documents: Vec<Document> => AppendOrOverwrite,
        pub generation: Option<String> => Overwrite,
        pub attempted_generations: u32 => Overwrite,
        pub grounded: bool => Overwrite,
        pub verified: bool => Overwrite,
    }
}

#[derive(Debug, Deserialize)]
struct RewrittenQueries {
    rewritten_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SampleAnswer {
    sample_answer: String,
}

fn rewriter(model: Arc<dyn ChatModel>) -> StructuredOutput<RewrittenQueries> {
    let schema = json!({
        "type": "object",
        "properties": {
            "rewritten_queries": {
                "type": "array",
                "items": {"type": "string"},
                "description": "A list of rewritten versions of the user's query. Each rewritten version is rewritten differently, rephrased and potentially uses synonyms."
            }
        },
        "required": ["rewritten_queries"]
    });
    with_structured_output(model, "RewrittenQueries", schema)
}

fn sampler(model: Arc<dyn ChatModel>) -> StructuredOutput<SampleAnswer> {
    let schema = json!({
        "type": "object",
        "properties": {
            "sample_answer": {
                "type": "string",
                "description": "A concise example answer for a question. This shouldn't exceed three sentences in length."
            }
        },
        "required": ["sample_answer"]
    });
    with_structured_output(model, "SampleAnswer", schema)
}

/// One retrieval branch per query, the original question first
fn continue_to_retrieval(state: &QueryExpansionState) -> Vec<Send<QueryExpansionState>> {
    std::iter::once(&state.question)
        .chain(&state.rewritten_queries)
        .map(|query| {
            Send::new(
                "retrieve_documents",
                QueryExpansionState {
                    question: query.clone(),
                    ..Default::default()
                },
            )
        })
        .collect()
}

/// Builder for the query-expansion RAG graph
pub struct QueryExpansionRag {
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    options: RagOptions,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
}

impl QueryExpansionRag {
    pub fn new(model: Arc<dyn ChatModel>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            model,
            retriever,
            options: RagOptions::default(),
            checkpointer: None,
        }
    }

    pub fn with_options(mut self, options: RagOptions) -> Self {
        self.options = options;
        self
    }

    /// Required to resume after `human_feedback`
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn build(self) -> Result<CompiledGraph<QueryExpansionState>> {
        let RagOptions {
            max_attempts,
            exhaustion,
            top_k,
            num_rewrites,
            grading_concurrency,
        } = self.options;
        let steps = self.options.recursion_limit();
        let rewriter = rewriter(Arc::clone(&self.model));
        let sampler = sampler(Arc::clone(&self.model));
        let retriever = self.retriever;
        let grading_model = Arc::clone(&self.model);
        let hallucination_grader = HallucinationGrader::new(Arc::clone(&self.model));
        let model = self.model;

        let mut graph = StateGraph::<QueryExpansionState>::new();

        graph.add_node("generate_rewritten_queries", move |state: QueryExpansionState, _ctx: NodeContext| {
            let rewriter = rewriter.clone();
            async move {
                let response = rewriter
                    .invoke(vec![
                        Message::system(REWRITE_PROMPT),
                        Message::human(format!(
                            "Here is the user's question: \n\n {}. Return {} queries.",
                            state.question, num_rewrites
                        )),
                    ])
                    .await?;
                let mut queries = response.rewritten_queries;
                queries.truncate(num_rewrites);
                tracing::debug!(rewrites = queries.len(), "question rewritten");
                Ok(QueryExpansionUpdate::default().rewritten_queries(queries))
            }
        });

        graph.add_node("retrieve_documents", move |state: QueryExpansionState, _ctx: NodeContext| {
            let sampler = sampler.clone();
            let retriever = Arc::clone(&retriever);
            async move {
                let sample = sampler
                    .invoke(vec![
                        Message::system(SAMPLE_ANSWER_PROMPT),
                        Message::human(format!("Here is the user's question: \n\n {}.", state.question)),
                    ])
                    .await?
                    .sample_answer;
                let documents = retriever
                    .retrieve(&format!("{}: {}", state.question, sample))
                    .await?;
                Ok(QueryExpansionUpdate::default().documents(ListUpdate::Append(documents)))
            }
        });

        graph.add_node("grade_documents", move |state: QueryExpansionState, _ctx: NodeContext| {
            let grader = ConversationGrader::new(Arc::clone(&grading_model), get_buffer_string(&state.messages));
            async move {
                let candidates = dedup_top_k(state.documents, top_k);
                let relevant = filter_relevant(&state.question, candidates, &grader, grading_concurrency).await?;
                Ok(QueryExpansionUpdate::default().documents(ListUpdate::Overwrite(relevant)))
            }
        });

        // stopped before; whatever the human added is already in the state
        graph.add_node("human_feedback", |_state: QueryExpansionState, _ctx: NodeContext| async {
            Ok(QueryExpansionUpdate::default())
        });

        graph.add_node("generate_response", move |state: QueryExpansionState, _ctx: NodeContext| {
            let model = Arc::clone(&model);
            async move {
                let conversation = get_buffer_string(&state.messages);
                let prompt = rag_prompt_with_history(&conversation, &state.question, &state.documents);
                let answer = generate(model.as_ref(), prompt).await?;
                Ok(QueryExpansionUpdate::default()
                    .generation(Some(answer))
                    .attempted_generations(state.attempted_generations + 1))
            }
        });

        graph.add_node("grade_hallucinations", move |state: QueryExpansionState, _ctx: NodeContext| {
            let grader = hallucination_grader.clone();
            async move {
                let generation = state.generation.unwrap_or_default();
                let grounded = grader.is_grounded(&state.documents, &generation).await?;
                Ok(QueryExpansionUpdate::default().grounded(grounded).verified(grounded))
            }
        });

        graph.add_node("give_up", move |state: QueryExpansionState, _ctx: NodeContext| async move {
            let kept = give_up(state.generation, state.attempted_generations, exhaustion)?;
            Ok(QueryExpansionUpdate::default().generation(kept).verified(false))
        });

        graph.add_node("configure_memory", |state: QueryExpansionState, _ctx: NodeContext| async move {
            Ok(QueryExpansionUpdate::default()
                .messages(vec![
                    Message::human(state.question),
                    Message::ai(state.generation.unwrap_or_default()),
                ])
                .attempted_generations(0u32)
                .grounded(false)
                .documents(ListUpdate::Overwrite(Vec::new())))
        });

        graph
            .add_edge(START, "generate_rewritten_queries")
            .add_conditional_edges(
                "generate_rewritten_queries",
                continue_to_retrieval,
                [("retrieve_documents", "retrieve_documents")],
            )
            .add_edge("retrieve_documents", "grade_documents")
            .add_conditional_edges(
                "grade_documents",
                |state: &QueryExpansionState| decide_to_generate(&state.documents),
                [(SOME_RELEVANT, "generate_response"), (NONE_RELEVANT, "human_feedback")],
            )
            .add_edge("human_feedback", "generate_response")
            .add_edge("generate_response", "grade_hallucinations")
            .add_conditional_edges(
                "grade_hallucinations",
                move |state: &QueryExpansionState| {
                    route_grade(state.attempted_generations, state.grounded, max_attempts).label()
                },
                [("accept", "configure_memory"), ("retry", "generate_response"), ("exhausted", "give_up")],
            )
            .add_edge("give_up", "configure_memory")
            .add_edge("configure_memory", END);

        let mut options = CompileOptions::new()
            .with_name("query_expansion_rag")
            .with_min_recursion_limit(steps)
            .interrupt_before(["human_feedback"]);
        if let Some(checkpointer) = self.checkpointer {
            options = options.with_checkpointer(checkpointer);
        }
        graph.compile_with(options)
    }
}
