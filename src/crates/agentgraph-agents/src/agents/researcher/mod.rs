//! Deep researcher: clarify, plan, research in parallel, write a report
//!
//! ```text
//!   START ─▶ clarify_with_user ─▶ write_research_brief ─▶ research_supervisor ─▶ final_report_generation ─▶ END
//! ```
//!
//! - `clarify_with_user` asks the model whether the request is clear
//!   enough; if not, the run suspends with the model's question and the
//!   reply is added to the conversation.
//! - `write_research_brief` turns the conversation into one research
//!   question.
//! - `research_supervisor` runs the [`supervisor`] subgraph, which fans
//!   out to [`research_unit`] subgraphs.
//! - `final_report_generation` writes the report from the notes, trying
//!   up to four times before giving up with an error report.

pub mod prompts;
pub mod research_unit;
pub mod supervisor;
pub mod tools;

pub use research_unit::{build_researcher, ResearcherState, ResearcherUpdate};
pub use supervisor::{build_supervisor, SupervisorState, SupervisorUpdate};

use crate::search::WebSearch;
use agentgraph_core::llm::{with_structured_output, ChatModel, ChatRequest};
use agentgraph_core::messages::get_buffer_string;
use agentgraph_core::state::{AddMessages, Append, Overwrite};
use agentgraph_core::{
    graph_state, retry_async, CompileOptions, CompiledGraph, GraphError, Message, NodeContext, Result, RetryPolicy,
    StateGraph, END, START,
};
use prompts::{CLARIFY_WITH_USER, FINAL_REPORT, LEAD_RESEARCHER, RESEARCH_BRIEF};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Output token cap of every research model call
pub const MAX_OUTPUT_TOKENS: u32 = 10_000;

/// Report generation attempts: the first call plus three retries
pub const FINAL_REPORT_ATTEMPTS: usize = 4;

pub const REPORT_FAILED: &str = "Error generating final report: Maximum retries exceeded";

/// Limits of the research phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchOptions {
    pub max_researcher_iterations: u32,
    pub max_react_tool_calls: u32,
    pub max_concurrent_research_units: usize,
    pub allow_clarification: bool,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_researcher_iterations: 3,
            max_react_tool_calls: 10,
            max_concurrent_research_units: 5,
            allow_clarification: true,
        }
    }
}

/// Today as "Mon Jan 6, 2025"
pub fn today() -> String {
    chrono::Local::now().format("%a %b %-d, %Y").to_string()
}

graph_state! {
    pub struct ResearchState (ResearchUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub research_brief: Option<String> => Overwrite,
        pub notes: Vec<String> => Overwrite,
        pub raw_notes: Vec<String> => Append,
        pub final_report: Option<String> => Overwrite,
    }
}

#[derive(Debug, Deserialize)]
struct ClarifyWithUser {
    need_clarification: bool,
    #[serde(default)]
    question: String,
    #[serde(default)]
    verification: String,
}

#[derive(Debug, Deserialize)]
struct ResearchQuestion {
    research_brief: String,
}

pub struct DeepResearcher {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn WebSearch>,
    options: ResearchOptions,
    compile: CompileOptions,
}

impl DeepResearcher {
    pub fn new(model: Arc<dyn ChatModel>, search: Arc<dyn WebSearch>) -> Self {
        Self {
            model,
            search,
            options: ResearchOptions::default(),
            compile: CompileOptions::new(),
        }
    }

    pub fn with_options(mut self, options: ResearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Clarification needs a checkpointer to suspend
    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.compile = options;
        self
    }

    pub fn build(self) -> Result<CompiledGraph<ResearchState>> {
        let options = self.options;
        let researcher = build_researcher(Arc::clone(&self.model), self.search, &options)?;
        let supervisor = build_supervisor(Arc::clone(&self.model), researcher, &options)?;
        let lead_prompt = LEAD_RESEARCHER
            .replace("{max_concurrent_research_units}", &options.max_concurrent_research_units.to_string())
            .replace("{max_researcher_iterations}", &options.max_researcher_iterations.to_string());
        let allow_clarification = options.allow_clarification;
        let clarify_model = Arc::clone(&self.model);
        let brief_model = Arc::clone(&self.model);
        let report_model = self.model;

        let mut graph = StateGraph::<ResearchState>::new();

        graph.add_node("clarify_with_user", move |state: ResearchState, ctx: NodeContext| {
            let model = Arc::clone(&clarify_model);
            async move {
                if !allow_clarification {
                    return Ok(ResearchUpdate::default());
                }
                let prompt = CLARIFY_WITH_USER
                    .replace("{messages}", &get_buffer_string(&state.messages))
                    .replace("{date}", &today());
                let response = with_structured_output::<ClarifyWithUser>(
                    model,
                    "ClarifyWithUser",
                    json!({
                        "type": "object",
                        "properties": {
                            "need_clarification": {"type": "boolean", "description": "Whether the user needs to be asked a clarifying question."},
                            "question": {"type": "string", "description": "A question to ask the user to clarify the report scope"},
                            "verification": {"type": "string", "description": "Verify message that we will start research after the user has provided the necessary information."}
                        },
                        "required": ["need_clarification", "question", "verification"]
                    }),
                )
                .invoke(vec![Message::human(prompt)])
                .await?;

                if response.need_clarification {
                    let reply = super::resume_text(ctx.interrupt(response.question.clone())?);
                    return Ok(ResearchUpdate::default()
                        .messages(vec![Message::ai(response.question), Message::human(reply)]));
                }
                Ok(ResearchUpdate::default().messages(vec![Message::ai(response.verification)]))
            }
        });

        graph.add_node("write_research_brief", move |state: ResearchState, _ctx: NodeContext| {
            let model = Arc::clone(&brief_model);
            async move {
                let prompt = RESEARCH_BRIEF
                    .replace("{messages}", &get_buffer_string(&state.messages))
                    .replace("{date}", &today());
                let response = with_structured_output::<ResearchQuestion>(
                    model,
                    "ResearchQuestion",
                    json!({
                        "type": "object",
                        "properties": {
                            "research_brief": {"type": "string", "description": "A research question that will be used to guide the research."}
                        },
                        "required": ["research_brief"]
                    }),
                )
                .invoke(vec![Message::human(prompt)])
                .await?;
                Ok(ResearchUpdate::default().research_brief(Some(response.research_brief)))
            }
        });

        graph.add_node("research_supervisor", move |state: ResearchState, _ctx: NodeContext| {
            let supervisor = supervisor.clone();
            let system = lead_prompt.replace("{date}", &today());
            async move {
                let brief = state.research_brief.unwrap_or_default();
                let result = supervisor
                    .invoke(
                        SupervisorUpdate::default()
                            .supervisor_messages(vec![Message::system(system), Message::human(brief.clone())])
                            .research_brief(brief),
                    )
                    .await?;
                tracing::info!(notes = result.notes.len(), iterations = result.research_iterations, "research done");
                Ok(ResearchUpdate::default().notes(result.notes).raw_notes(result.raw_notes))
            }
        });

        graph.add_node("final_report_generation", move |state: ResearchState, _ctx: NodeContext| {
            let model = Arc::clone(&report_model);
            async move {
                let prompt = FINAL_REPORT
                    .replace("{research_brief}", state.research_brief.as_deref().unwrap_or_default())
                    .replace("{messages}", &get_buffer_string(&state.messages))
                    .replace("{findings}", &state.notes.join("\n"))
                    .replace("{date}", &today());
                let policy = RetryPolicy::immediate(FINAL_REPORT_ATTEMPTS);
                let report = retry_async(
                    &policy,
                    |_: &GraphError| true,
                    |_| {
                        let request =
                            ChatRequest::new(vec![Message::human(prompt.clone())]).with_max_tokens(MAX_OUTPUT_TOKENS);
                        let model = Arc::clone(&model);
                        async move { model.chat(request).await }
                    },
                )
                .await;

                let update = ResearchUpdate::default().notes(Vec::new());
                match report {
                    Ok(response) => {
                        let message = response.message;
                        Ok(update.final_report(Some(message.content.clone())).messages(vec![message]))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "final report failed");
                        Ok(update
                            .final_report(Some(REPORT_FAILED.to_string()))
                            .messages(vec![Message::ai("Report generation failed")]))
                    }
                }
            }
        });

        graph
            .add_edge(START, "clarify_with_user")
            .add_edge("clarify_with_user", "write_research_brief")
            .add_edge("write_research_brief", "research_supervisor")
            .add_edge("research_supervisor", "final_report_generation")
            .add_edge("final_report_generation", END);

        graph.compile_with(self.compile.with_name("deep_researcher"))
    }
}
