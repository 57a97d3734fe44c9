//! Retrieve, then answer from what was retrieved

use super::{generate, rag_prompt};
use crate::retrieval::Retriever;
use agentgraph_core::llm::ChatModel;
use agentgraph_core::state::Overwrite;
use agentgraph_core::{graph_state, CompileOptions, CompiledGraph, Document, NodeContext, Result, StateGraph, END, START};
use std::sync::Arc;

graph_state! {
    pub struct SimpleRagState (SimpleRagUpdate) {
        pub question: String => Overwrite,
        pub documents: Vec<Document> => Overwrite,
        pub generation: Option<String> => Overwrite,
    }
}

pub fn create_simple_rag(
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
) -> Result<CompiledGraph<SimpleRagState>> {
    let mut graph = StateGraph::<SimpleRagState>::new();

    graph.add_node("retrieve_documents", move |state: SimpleRagState, _ctx: NodeContext| {
        let retriever = Arc::clone(&retriever);
        async move {
            let documents = retriever.retrieve(&state.question).await?;
            Ok(SimpleRagUpdate::default().documents(documents))
        }
    });

    graph.add_node("generate_response", move |state: SimpleRagState, _ctx: NodeContext| {
        let model = Arc::clone(&model);
        async move {
            let answer = generate(model.as_ref(), rag_prompt(&state.question, &state.documents)).await?;
            Ok(SimpleRagUpdate::default().generation(Some(answer)))
        }
    });

    graph
        .add_edge(START, "retrieve_documents")
        .add_edge("retrieve_documents", "generate_response")
        .add_edge("generate_response", END);
    graph.compile_with(CompileOptions::new().with_name("simple_rag"))
}
