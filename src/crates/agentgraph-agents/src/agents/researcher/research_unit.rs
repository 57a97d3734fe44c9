//! One researcher: search and reflect on a topic, then compress the findings
//!
//! ```text
//!   START ─▶ researcher ─▶ researcher_tools ──(more)──▶ researcher
//!                                  │
//!                      (no calls | complete | cap)
//!                                  ▼
//!                          compress_research ─▶ END
//! ```

use super::prompts::{COMPRESS_RESEARCH, COMPRESS_RESEARCH_REQUEST, RESEARCHER};
use super::tools::{research_complete, think_tool, RESEARCH_COMPLETE};
use super::{today, ResearchOptions, MAX_OUTPUT_TOKENS};
use crate::search::{WebSearch, WebSearchTool};
use crate::tools::{execute_tool_safely, ToolContext, ToolRegistry};
use agentgraph_core::llm::{ChatModel, ChatRequest};
use agentgraph_core::state::{AddMessages, Append, Overwrite};
use agentgraph_core::{
    graph_state, CompileOptions, CompiledGraph, Message, MessageRole, NodeContext, Result, StateGraph, END, START,
};
use futures::future::join_all;
use std::sync::Arc;

graph_state! {
    pub struct ResearcherState (ResearcherUpdate) {
        pub researcher_messages: Vec<Message> => AddMessages,
        pub research_topic: String => Overwrite,
        pub tool_call_iterations: u32 => Overwrite,
        pub compressed_research: String => Overwrite,
        pub raw_notes: Vec<String> => Append,
    }
}

/// `compress_research` when the last model turn called no tools, called
/// `ResearchComplete`, or used up the tool-call budget
pub fn route_researcher_tools(state: &ResearcherState, max_tool_calls: u32) -> &'static str {
    let last_turn = state.researcher_messages.iter().rev().find(|m| m.is_ai());
    let done = match last_turn {
        Some(turn) => {
            !turn.has_tool_calls()
                || turn.tool_calls.iter().any(|c| c.name == RESEARCH_COMPLETE)
                || state.tool_call_iterations >= max_tool_calls
        }
        None => true,
    };
    if done {
        "compress_research"
    } else {
        "researcher"
    }
}

pub fn build_researcher(
    model: Arc<dyn ChatModel>,
    search: Arc<dyn WebSearch>,
    options: &ResearchOptions,
) -> Result<CompiledGraph<ResearcherState>> {
    let registry = Arc::new(
        ToolRegistry::new()
            .with(WebSearchTool::new(search))
            .with(think_tool())
            .with(research_complete()),
    );
    let definitions = registry.definitions();
    let max_tool_calls = options.max_react_tool_calls;
    let compress_model = Arc::clone(&model);

    let mut graph = StateGraph::<ResearcherState>::new();

    graph.add_node("researcher", move |state: ResearcherState, _ctx: NodeContext| {
        let model = Arc::clone(&model);
        let definitions = definitions.clone();
        async move {
            let request = ChatRequest::new(state.researcher_messages)
                .with_system(RESEARCHER.replace("{date}", &today()))
                .with_tools(definitions)
                .with_max_tokens(MAX_OUTPUT_TOKENS);
            let reply = model.chat(request).await?.message;
            Ok(ResearcherUpdate::default()
                .researcher_messages(vec![reply])
                .tool_call_iterations(state.tool_call_iterations + 1))
        }
    });

    graph.add_node("researcher_tools", move |state: ResearcherState, _ctx: NodeContext| {
        let registry = Arc::clone(&registry);
        async move {
            let calls = match state.researcher_messages.last() {
                Some(last) if last.is_ai() => last.tool_calls.clone(),
                _ => Vec::new(),
            };
            let ctx = ToolContext::new();
            let observations = join_all(calls.iter().map(|call| execute_tool_safely(&registry, call, &ctx))).await;
            let outputs: Vec<Message> = calls
                .iter()
                .zip(observations)
                .map(|(call, observation)| Message::tool(observation, call.id.clone()).with_name(call.name.clone()))
                .collect();
            Ok(ResearcherUpdate::default().researcher_messages(outputs))
        }
    });

    graph.add_node("compress_research", move |state: ResearcherState, _ctx: NodeContext| {
        let model = Arc::clone(&compress_model);
        async move {
            let raw_notes: Vec<&str> = state
                .researcher_messages
                .iter()
                .filter(|m| m.is_ai() || m.role == MessageRole::Tool)
                .map(|m| m.content.as_str())
                .collect();
            let raw_notes = raw_notes.join("\n");

            let mut messages = vec![Message::system(COMPRESS_RESEARCH.replace("{date}", &today()))];
            messages.extend(state.researcher_messages);
            messages.push(Message::human(COMPRESS_RESEARCH_REQUEST));
            let response = model
                .chat(ChatRequest::new(messages).with_max_tokens(MAX_OUTPUT_TOKENS))
                .await?
                .message;
            tracing::debug!(topic = %state.research_topic, "research compressed");
            Ok(ResearcherUpdate::default()
                .compressed_research(response.content)
                .raw_notes(vec![raw_notes]))
        }
    });

    graph
        .add_edge(START, "researcher")
        .add_edge("researcher", "researcher_tools")
        .add_conditional_edges(
            "researcher_tools",
            move |state: &ResearcherState| route_researcher_tools(state, max_tool_calls),
            [("researcher", "researcher"), ("compress_research", "compress_research")],
        )
        .add_edge("compress_research", END);

    graph.compile_with(CompileOptions::new().with_name("researcher"))
}
