//! Research supervisor: plan, delegate to researchers, decide when to stop
//!
//! ```text
//!   START ─▶ supervisor ─▶ supervisor_tools ──(done)──▶ END
//!               ▲                  │
//!               └──────────────────┘
//! ```
//!
//! `ConductResearch` calls of one turn run as concurrent researcher
//! subgraphs, at most `max_concurrent_research_units` of them; the rest are
//! answered with an error. The phase ends when the supervisor stops calling
//! tools, calls `ResearchComplete`, exceeds its iteration budget or a
//! researcher fails. Its notes are the contents of every tool message.

use super::research_unit::{ResearcherState, ResearcherUpdate};
use super::tools::{supervisor_tools, CONDUCT_RESEARCH, RESEARCH_COMPLETE, THINK_TOOL};
use super::{ResearchOptions, MAX_OUTPUT_TOKENS};
use agentgraph_core::llm::{ChatModel, ChatRequest};
use agentgraph_core::state::{AddMessages, Append, Overwrite};
use agentgraph_core::{
    graph_state, CompileOptions, CompiledGraph, Message, MessageRole, NodeContext, Result, StateGraph, END, START,
};
use futures::future::join_all;
use std::sync::Arc;

graph_state! {
    pub struct SupervisorState (SupervisorUpdate) {
        pub supervisor_messages: Vec<Message> => AddMessages,
        pub research_brief: String => Overwrite,
        pub notes: Vec<String> => Overwrite,
        pub raw_notes: Vec<String> => Append,
        pub research_iterations: u32 => Overwrite,
        pub research_done: bool => Overwrite,
    }
}

/// Contents of every tool message
pub fn notes_from_tool_calls(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .map(|m| m.content.clone())
        .collect()
}

fn finish(state: &SupervisorState) -> SupervisorUpdate {
    SupervisorUpdate::default()
        .notes(notes_from_tool_calls(&state.supervisor_messages))
        .research_done(true)
}

pub fn build_supervisor(
    model: Arc<dyn ChatModel>,
    researcher: CompiledGraph<ResearcherState>,
    options: &ResearchOptions,
) -> Result<CompiledGraph<SupervisorState>> {
    let max_iterations = options.max_researcher_iterations;
    let max_units = options.max_concurrent_research_units;
    let definitions = supervisor_tools();

    let mut graph = StateGraph::<SupervisorState>::new();

    graph.add_node("supervisor", move |state: SupervisorState, _ctx: NodeContext| {
        let model = Arc::clone(&model);
        let definitions = definitions.clone();
        async move {
            let request = ChatRequest::new(state.supervisor_messages)
                .with_tools(definitions)
                .with_max_tokens(MAX_OUTPUT_TOKENS);
            let reply = model.chat(request).await?.message;
            Ok(SupervisorUpdate::default()
                .supervisor_messages(vec![reply])
                .research_iterations(state.research_iterations + 1))
        }
    });

    graph.add_node("supervisor_tools", move |state: SupervisorState, _ctx: NodeContext| {
        let researcher = researcher.clone();
        async move {
            let Some(last) = state.supervisor_messages.last().cloned() else {
                return Ok(finish(&state));
            };
            let exceeded = state.research_iterations > max_iterations;
            let complete = last.tool_calls.iter().any(|c| c.name == RESEARCH_COMPLETE);
            if exceeded || !last.has_tool_calls() || complete {
                tracing::info!(
                    iterations = state.research_iterations,
                    exceeded,
                    complete,
                    "research phase finished"
                );
                return Ok(finish(&state));
            }

            let mut outputs: Vec<Message> = last
                .tool_calls
                .iter()
                .filter(|c| c.name == THINK_TOOL)
                .map(|c| {
                    let reflection = c.str_arg("reflection").unwrap_or_default();
                    Message::tool(format!("Reflection recorded: {}", reflection), c.id.clone()).with_name(THINK_TOOL)
                })
                .collect();

            let research_calls: Vec<_> = last.tool_calls.iter().filter(|c| c.name == CONDUCT_RESEARCH).collect();
            let split = research_calls.len().min(max_units);
            let (allowed, overflow) = research_calls.split_at(split);

            let mut update = SupervisorUpdate::default();
            if !allowed.is_empty() {
                let runs = allowed.iter().map(|call| {
                    let topic = call.str_arg("research_topic").unwrap_or_default().to_string();
                    researcher.invoke(
                        ResearcherUpdate::default()
                            .researcher_messages(vec![Message::human(topic.clone())])
                            .research_topic(topic),
                    )
                });
                let results = join_all(runs).await;
                let mut findings = Vec::with_capacity(results.len());
                for result in results {
                    match result {
                        Ok(found) => findings.push(found),
                        Err(e) => {
                            tracing::warn!(error = %e, "researcher failed, ending research");
                            return Ok(finish(&state));
                        }
                    }
                }

                for (found, call) in findings.iter().zip(allowed) {
                    let content = if found.compressed_research.is_empty() {
                        "Error synthesizing research report".to_string()
                    } else {
                        found.compressed_research.clone()
                    };
                    outputs.push(Message::tool(content, call.id.clone()).with_name(CONDUCT_RESEARCH));
                }
                let raw_notes: Vec<String> = findings.iter().map(|f| f.raw_notes.join("\n")).collect();
                let raw_notes = raw_notes.join("\n");
                if !raw_notes.is_empty() {
                    update = update.raw_notes(vec![raw_notes]);
                }
            }

            for call in overflow {
                outputs.push(
                    Message::tool(
                        format!("Error: Exceeded max concurrent research units ({})", max_units),
                        call.id.clone(),
                    )
                    .with_name(CONDUCT_RESEARCH),
                );
            }

            Ok(update.supervisor_messages(outputs))
        }
    });

    graph
        .add_edge(START, "supervisor")
        .add_edge("supervisor", "supervisor_tools")
        .add_conditional_edges(
            "supervisor_tools",
            |state: &SupervisorState| if state.research_done { END } else { "supervisor" },
            [("supervisor", "supervisor"), (END, END)],
        );

    graph.compile_with(CompileOptions::new().with_name("research_supervisor"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::researcher::research_unit::build_researcher;
    use crate::search::tests::CannedSearch;
    use agentgraph_core::llm::{ScriptedChatModel, ToolCall};
    use serde_json::json;

    fn researcher(model: &ScriptedChatModel) -> CompiledGraph<ResearcherState> {
        build_researcher(
            Arc::new(model.clone()),
            Arc::new(CannedSearch::default()),
            &ResearchOptions::default(),
        )
        .unwrap()
    }

    fn start() -> SupervisorUpdate {
        SupervisorUpdate::default()
            .supervisor_messages(vec![Message::human("Compare Rust async runtimes")])
            .research_brief("Compare Rust async runtimes")
    }

    #[tokio::test]
    async fn test_iteration_budget() {
        let model = ScriptedChatModel::from_fn(|_| {
            Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                "think",
                THINK_TOOL,
                json!({"reflection": "plan"}),
            )]))
        });
        let supervisor = build_supervisor(Arc::new(model.clone()), researcher(&model), &ResearchOptions::default()).unwrap();

        let state = supervisor.invoke(start()).await.unwrap();

        assert_eq!(state.research_iterations, 4);
        assert_eq!(model.calls(), 4);
        assert_eq!(state.notes, vec!["Reflection recorded: plan"; 3]);
        assert!(state.research_done);
    }

    #[tokio::test]
    async fn test_research_fans_out_and_caps_units() {
        let model = ScriptedChatModel::from_fn(|request| {
            let supervising = request.tools.iter().any(|t| t.name == CONDUCT_RESEARCH);
            if supervising {
                let delegated = request.messages.iter().any(|m| m.role == MessageRole::Tool);
                if delegated {
                    return Ok(Message::ai("").with_tool_calls(vec![ToolCall::new("end", RESEARCH_COMPLETE, json!({}))]));
                }
                let calls = (0..6)
                    .map(|i| ToolCall::new(format!("r{i}"), CONDUCT_RESEARCH, json!({"research_topic": format!("topic {i}")})))
                    .collect();
                return Ok(Message::ai("").with_tool_calls(calls));
            }
            if request.tools.is_empty() {
                // compression: echo the topic the researcher was given
                return Ok(Message::ai(format!("findings on {}", request.messages[1].content)));
            }
            Ok(Message::ai("nothing to search"))
        });
        let supervisor = build_supervisor(Arc::new(model.clone()), researcher(&model), &ResearchOptions::default()).unwrap();

        let state = supervisor.invoke(start()).await.unwrap();

        assert_eq!(state.notes.len(), 6);
        assert_eq!(state.notes[0], "findings on topic 0");
        assert_eq!(state.notes[4], "findings on topic 4");
        assert_eq!(state.notes[5], "Error: Exceeded max concurrent research units (5)");
        assert_eq!(state.raw_notes.len(), 1);
        assert!(state.raw_notes[0].contains("nothing to search"));
    }

    #[tokio::test]
    async fn test_answer_without_tools_ends() {
        let model = ScriptedChatModel::new([Message::ai("No research needed.")]);
        let supervisor = build_supervisor(Arc::new(model.clone()), researcher(&model), &ResearchOptions::default()).unwrap();

        let state = supervisor.invoke(start()).await.unwrap();

        assert_eq!(state.research_iterations, 1);
        assert!(state.notes.is_empty());
    }
}
