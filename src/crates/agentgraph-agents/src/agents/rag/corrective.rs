//! Corrective RAG: grade what was retrieved, then check the answer
//!
//! ```text
//!   START ─▶ retrieve_documents ─▶ grade_documents ──(none relevant)──▶ END
//!                                        │
//!                                  (some relevant)
//!                                        ▼
//!                 ┌──────────▶ generate_response ─▶ grade_hallucinations ──(accept)──▶ END
//!                 │                                        │
//!                 └──────────────(retry)───────────────────┤
//!                                                     (exhausted)
//!                                                          ▼
//!                                                       give_up ─▶ END
//! ```
//!
//! Irrelevant documents are dropped before generation. An answer the
//! hallucination grader does not find grounded is regenerated until
//! `max_attempts` generations were made; what happens then is the
//! [`ExhaustionPolicy`] of the [`RagOptions`]. `verified` is true only for
//! an answer the grader accepted.

use super::{decide_to_generate, generate, give_up, rag_prompt, HallucinationGrader, RagOptions, NONE_RELEVANT, SOME_RELEVANT};
use crate::retrieval::Retriever;
use agentgraph_core::llm::ChatModel;
use agentgraph_core::relevance::LlmDocumentGrader;
use agentgraph_core::state::Overwrite;
use agentgraph_core::{
    filter_relevant, graph_state, route_grade, CompileOptions, CompiledGraph, Document, ExhaustionPolicy, NodeContext,
    Result, StateGraph, END, START,
};
use std::sync::Arc;

graph_state! {
    pub struct CorrectiveRagState (CorrectiveRagUpdate) {
        pub question: String => Overwrite,
        pub documents: Vec<Document> => Overwrite,
        pub generation: Option<String> => Overwrite,
        pub attempted_generations: u32 => Overwrite,
        pub grounded: bool => Overwrite,
        pub verified: bool => Overwrite,
    }
}

/// Builder for the corrective RAG graph
pub struct CorrectiveRag {
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    options: RagOptions,
}

impl CorrectiveRag {
    pub fn new(model: Arc<dyn ChatModel>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            model,
            retriever,
            options: RagOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RagOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<CompiledGraph<CorrectiveRagState>> {
        let RagOptions {
            max_attempts,
            exhaustion,
            grading_concurrency,
            ..
        } = self.options;
        let steps = self.options.recursion_limit();
        let retriever = self.retriever;
        let document_grader = Arc::new(LlmDocumentGrader::new(Arc::clone(&self.model)));
        let hallucination_grader = HallucinationGrader::new(Arc::clone(&self.model));
        let model = self.model;

        let mut graph = StateGraph::<CorrectiveRagState>::new();

        graph.add_node("retrieve_documents", move |state: CorrectiveRagState, _ctx: NodeContext| {
            let retriever = Arc::clone(&retriever);
            async move {
                let documents = retriever.retrieve(&state.question).await?;
                tracing::debug!(retrieved = documents.len(), "documents retrieved");
                Ok(CorrectiveRagUpdate::default().documents(documents))
            }
        });

        graph.add_node("grade_documents", move |state: CorrectiveRagState, _ctx: NodeContext| {
            let grader = Arc::clone(&document_grader);
            async move {
                let relevant =
                    filter_relevant(&state.question, state.documents, grader.as_ref(), grading_concurrency).await?;
                Ok(CorrectiveRagUpdate::default().documents(relevant))
            }
        });

        graph.add_node("generate_response", move |state: CorrectiveRagState, _ctx: NodeContext| {
            let model = Arc::clone(&model);
            async move {
                let answer = generate(model.as_ref(), rag_prompt(&state.question, &state.documents)).await?;
                Ok(CorrectiveRagUpdate::default()
                    .generation(Some(answer))
                    .attempted_generations(state.attempted_generations + 1))
            }
        });

        graph.add_node("grade_hallucinations", move |state: CorrectiveRagState, _ctx: NodeContext| {
            let grader = hallucination_grader.clone();
            async move {
                let generation = state.generation.unwrap_or_default();
                let grounded = grader.is_grounded(&state.documents, &generation).await?;
                Ok(CorrectiveRagUpdate::default().grounded(grounded).verified(grounded))
            }
        });

        graph.add_node("give_up", move |state: CorrectiveRagState, _ctx: NodeContext| async move {
            let kept = give_up(state.generation, state.attempted_generations, exhaustion)?;
            Ok(CorrectiveRagUpdate::default().generation(kept).verified(false))
        });

        graph
            .add_edge(START, "retrieve_documents")
            .add_edge("retrieve_documents", "grade_documents")
            .add_conditional_edges(
                "grade_documents",
                |state: &CorrectiveRagState| decide_to_generate(&state.documents),
                [(SOME_RELEVANT, "generate_response"), (NONE_RELEVANT, END)],
            )
            .add_edge("generate_response", "grade_hallucinations")
            .add_conditional_edges(
                "grade_hallucinations",
                move |state: &CorrectiveRagState| {
                    route_grade(state.attempted_generations, state.grounded, max_attempts).label()
                },
                [("accept", END), ("retry", "generate_response"), ("exhausted", "give_up")],
            )
            .add_edge("give_up", END);

        graph.compile_with(
            CompileOptions::new()
                .with_name("corrective_rag")
                .with_min_recursion_limit(steps),
        )
    }
}

/// Corrective RAG with the default options
pub fn create_corrective_rag(
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
) -> Result<CompiledGraph<CorrectiveRagState>> {
    CorrectiveRag::new(model, retriever).build()
}

/// Options with a different exhaustion policy
pub fn with_policy(policy: ExhaustionPolicy) -> RagOptions {
    RagOptions {
        exhaustion: policy,
        ..RagOptions::default()
    }
}
