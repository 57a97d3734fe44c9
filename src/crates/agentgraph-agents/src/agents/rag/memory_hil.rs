//! Conversational RAG that asks the human for context before answering
//!
//! ```text
//!   START ─▶ retrieve_documents ─▶ grade_documents ──(none relevant)──▶ END
//!                                        │
//!                                  (some relevant)
//!                                        ▼
//!                 ┌──────────▶ generate_response ─▶ grade_hallucinations ──(accept)──▶ configure_memory ─▶ END
//!                 └──────────────(retry)───────────────────┤                                 ▲
//!                                                     (exhausted) ─▶ give_up ────────────────┘
//! ```
//!
//! `generate_response` interrupts with "Do you have anything else to add
//! that you think is relevant?" and appends the reply to the conversation
//! it answers from. Each regeneration asks again. Grading sees the
//! conversation too, and `configure_memory` adds the finished exchange to
//! it.

use super::{
    decide_to_generate, generate, give_up, rag_prompt_with_history, ConversationGrader, HallucinationGrader,
    RagOptions, NONE_RELEVANT, SOME_RELEVANT,
};
use crate::agents::resume_text;
use crate::retrieval::Retriever;
use agentgraph_core::llm::ChatModel;
use agentgraph_core::messages::get_buffer_string;
use agentgraph_core::state::{AddMessages, Overwrite};
use agentgraph_core::{
    filter_relevant, graph_state, route_grade, CheckpointSaver, CompileOptions, CompiledGraph, Document, Message,
    NodeContext, Result, StateGraph, END, START,
};
use std::sync::Arc;

/// Question asked before every generation
pub const ASK_FOR_CONTEXT: &str = "Do you have anything else to add that you think is relevant?";

graph_state! {
    pub struct MemoryHilState (MemoryHilUpdate) {
        pub question: String => Overwrite,
        pub messages: Vec<Message> => AddMessages,
        pub documents: Vec<Document> => Overwrite,
        pub generation: Option<String> => Overwrite,
        pub attempted_generations: u32 => Overwrite,
        pub grounded: bool => Overwrite,
        pub verified: bool => Overwrite,
    }
}

pub struct MemoryHilRag {
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    options: RagOptions,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
}

impl MemoryHilRag {
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

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn build(self) -> Result<CompiledGraph<MemoryHilState>> {
        let RagOptions {
            max_attempts,
            exhaustion,
            grading_concurrency,
            ..
        } = self.options;
        let steps = self.options.recursion_limit();
        let retriever = self.retriever;
        let grading_model = Arc::clone(&self.model);
        let hallucination_grader = HallucinationGrader::new(Arc::clone(&self.model));
        let model = self.model;

        let mut graph = StateGraph::<MemoryHilState>::new();

        graph.add_node("retrieve_documents", move |state: MemoryHilState, _ctx: NodeContext| {
            let retriever = Arc::clone(&retriever);
            async move {
                let documents = retriever.retrieve(&state.question).await?;
                Ok(MemoryHilUpdate::default().documents(documents))
            }
        });

        graph.add_node("grade_documents", move |state: MemoryHilState, _ctx: NodeContext| {
            let grader = ConversationGrader::new(Arc::clone(&grading_model), get_buffer_string(&state.messages));
            async move {
                let relevant = filter_relevant(&state.question, state.documents, &grader, grading_concurrency).await?;
                Ok(MemoryHilUpdate::default().documents(relevant))
            }
        });

        graph.add_node("generate_response", move |state: MemoryHilState, ctx: NodeContext| {
            let model = Arc::clone(&model);
            async move {
                let additional = resume_text(ctx.interrupt(ASK_FOR_CONTEXT)?);
                let mut conversation = get_buffer_string(&state.messages);
                if !additional.is_empty() {
                    if !conversation.is_empty() {
                        conversation.push('\n');
                    }
                    conversation.push_str(&additional);
                }
                let prompt = rag_prompt_with_history(&conversation, &state.question, &state.documents);
                let answer = generate(model.as_ref(), prompt).await?;
                Ok(MemoryHilUpdate::default()
                    .generation(Some(answer))
                    .attempted_generations(state.attempted_generations + 1))
            }
        });

        graph.add_node("grade_hallucinations", move |state: MemoryHilState, _ctx: NodeContext| {
            let grader = hallucination_grader.clone();
            async move {
                let generation = state.generation.unwrap_or_default();
                let grounded = grader.is_grounded(&state.documents, &generation).await?;
                Ok(MemoryHilUpdate::default().grounded(grounded).verified(grounded))
            }
        });

        graph.add_node("give_up", move |state: MemoryHilState, _ctx: NodeContext| async move {
            let kept = give_up(state.generation, state.attempted_generations, exhaustion)?;
            Ok(MemoryHilUpdate::default().generation(kept).verified(false))
        });

        graph.add_node("configure_memory", |state: MemoryHilState, _ctx: NodeContext| async move {
            Ok(MemoryHilUpdate::default()
                .messages(vec![
                    Message::human(state.question),
                    Message::ai(state.generation.unwrap_or_default()),
                ])
                .attempted_generations(0u32)
                .grounded(false)
                .documents(Vec::new()))
        });

        graph
            .add_edge(START, "retrieve_documents")
            .add_edge("retrieve_documents", "grade_documents")
            .add_conditional_edges(
                "grade_documents",
                |state: &MemoryHilState| decide_to_generate(&state.documents),
                [(SOME_RELEVANT, "generate_response"), (NONE_RELEVANT, END)],
            )
            .add_edge("generate_response", "grade_hallucinations")
            .add_conditional_edges(
                "grade_hallucinations",
                move |state: &MemoryHilState| route_grade(state.attempted_generations, state.grounded, max_attempts).label(),
                [("accept", "configure_memory"), ("retry", "generate_response"), ("exhausted", "give_up")],
            )
            .add_edge("give_up", "configure_memory")
            .add_edge("configure_memory", END);

        let mut options = CompileOptions::new().with_name("memory_hil_rag").with_min_recursion_limit(steps);
        if let Some(checkpointer) = self.checkpointer {
            options = options.with_checkpointer(checkpointer);
        }
        graph.compile_with(options)
    }
}

pub fn create_memory_hil_rag(
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    checkpointer: Arc<dyn CheckpointSaver>,
) -> Result<CompiledGraph<MemoryHilState>> {
    MemoryHilRag::new(model, retriever).with_checkpointer(checkpointer).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::rag::tests::{corpus, rag_model, schema_name};
    use agentgraph_core::{Command, InMemoryCheckpointSaver, RunConfig};

    fn rag(model: &agentgraph_core::llm::ScriptedChatModel) -> CompiledGraph<MemoryHilState> {
        create_memory_hil_rag(
            Arc::new(model.clone()),
            Arc::new(corpus()),
            Arc::new(InMemoryCheckpointSaver::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_asks_for_context_before_answering() {
        let model = rag_model("interrupt", vec![true]);
        let graph = rag(&model);
        let config = RunConfig::for_thread("hil");

        let outcome = graph
            .invoke_with_config(MemoryHilUpdate::default().question("How do I pause with an interrupt?"), &config)
            .await
            .unwrap();
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.interrupts()[0].prompt(), Some(ASK_FOR_CONTEXT));
        assert_eq!(outcome.state().documents.len(), 1);

        let state = graph
            .resume(&config, Command::resume("I am building a review step."))
            .await
            .unwrap()
            .into_state();

        assert!(state.verified);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, "answer 1");
        assert!(state.documents.is_empty());
        assert_eq!(state.attempted_generations, 0);
        let prompt = &model
            .requests()
            .into_iter()
            .find(|r| schema_name(r).is_none())
            .unwrap()
            .messages[0]
            .content;
        assert!(prompt.contains("I am building a review step."));
        assert!(prompt.contains("An interrupt pauses the graph"));
    }

    #[tokio::test]
    async fn test_each_regeneration_asks_again() {
        let model = rag_model("interrupt", vec![false, true]);
        let graph = rag(&model);
        let config = RunConfig::for_thread("twice");

        graph
            .invoke_with_config(MemoryHilUpdate::default().question("How do I pause with an interrupt?"), &config)
            .await
            .unwrap();
        let second = graph.resume(&config, Command::resume("")).await.unwrap();
        assert!(second.is_interrupted());
        assert_eq!(second.state().attempted_generations, 1);

        let state = graph.resume(&config, Command::resume("")).await.unwrap().into_state();
        assert_eq!(state.messages[1].content, "answer 2");
    }

    #[tokio::test]
    async fn test_nothing_relevant_ends() {
        let model = rag_model("nothing-matches", vec![]);
        let graph = rag(&model);
        let outcome = graph
            .invoke_with_config(
                MemoryHilUpdate::default().question("How do I pause with an interrupt?"),
                &RunConfig::for_thread("empty"),
            )
            .await
            .unwrap();
        assert!(!outcome.is_interrupted());
        assert_eq!(outcome.state().generation, None);
    }
}
