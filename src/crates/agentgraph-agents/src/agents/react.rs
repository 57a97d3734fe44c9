//! ReAct agent - a model calling tools in a loop
//!
//! ```text
//!   START ──▶ agent ──(tool calls?)──▶ tools ──┐
//!               ▲            │                 │
//!               │            └── no ──▶ END    │
//!               └──────────────────────────────┘
//! ```
//!
//! The agent node sends the conversation (after the optional system
//! prompt) with every tool definition; the tools node runs the requested
//! calls through a [`ToolNode`]. The loop ends when the model answers
//! without tool calls.
//!
//! `context` carries values for the tools that the model must not choose,
//! for example the verified customer id of the music store subagents.
//!
//! When the recursion limit would cut the loop off in the middle of a tool
//! round, the agent answers "Sorry, need more steps to process this
//! request." instead of calling more tools.
//!
//! ```rust,ignore
//! let agent = create_react_agent(model, tools, Some("You are a helpful assistant"))?;
//! let state = agent
//!     .invoke(ReactUpdate::default().messages(vec![Message::human("What albums does AC/DC have?")]))
//!     .await?;
//! println!("{}", state.messages.last().map(|m| m.content.as_str()).unwrap_or_default());
//! ```

use crate::tool_node::{tools_condition, ToolNode, TOOLS};
use crate::tools::{Tool, ToolContext, ToolRegistry};
use agentgraph_core::llm::{ChatModel, ChatRequest, ToolChoice};
use agentgraph_core::state::{AddMessages, Merge};
use agentgraph_core::{graph_state, CompileOptions, CompiledGraph, Message, NodeContext, Result, StateGraph, END, START};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Reply given instead of a tool round the step budget cannot finish
pub const NEED_MORE_STEPS: &str = "Sorry, need more steps to process this request.";

graph_state! {
    pub struct ReactState (ReactUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub context: HashMap<String, Value> => Merge,
    }
}

/// Builder for a ReAct agent graph
pub struct ReactAgentConfig {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    prompt: Option<String>,
    name: Option<String>,
    tool_choice: Option<ToolChoice>,
    options: CompileOptions,
}

impl ReactAgentConfig {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self {
            model,
            tools,
            prompt: None,
            name: None,
            tool_choice: None,
            options: CompileOptions::new(),
        }
    }

    /// System prompt placed before the conversation on every model call
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Checkpointer, store or interrupt points for the compiled graph
    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<CompiledGraph<ReactState>> {
        let tool_node = ToolNode::new(self.tools);
        let model = self.model;
        let prompt = self.prompt;
        let tool_choice = self.tool_choice;
        let definitions = tool_node.registry().definitions();

        let mut graph = StateGraph::<ReactState>::new();
        graph.add_node("agent", move |state: ReactState, ctx: NodeContext| {
            let model = Arc::clone(&model);
            let prompt = prompt.clone();
            let tool_choice = tool_choice.clone();
            let definitions = definitions.clone();
            async move {
                let mut messages = Vec::with_capacity(state.messages.len() + 1);
                if let Some(prompt) = prompt {
                    messages.push(Message::system(prompt));
                }
                messages.extend(state.messages);

                let mut request = ChatRequest::new(messages).with_tools(definitions);
                request.tool_choice = tool_choice;
                let mut reply = model.chat(request).await?.message;

                // a tool round needs this step, the tools step and one more agent step
                if reply.has_tool_calls() && ctx.remaining_steps() < 3 {
                    tracing::warn!(remaining = ctx.remaining_steps(), "step budget too small for another tool round");
                    reply = Message::ai(NEED_MORE_STEPS);
                }
                Ok(ReactUpdate::default().messages(vec![reply]))
            }
        });

        graph.add_node(TOOLS, move |state: ReactState, _ctx: NodeContext| {
            let tool_node = tool_node.clone();
            async move {
                let ctx = ToolContext::from(state.context);
                let results = tool_node.run(&state.messages, &ctx).await?;
                Ok(ReactUpdate::default().messages(results))
            }
        });

        graph
            .add_edge(START, "agent")
            .add_conditional_edges(
                "agent",
                |state: &ReactState| tools_condition(&state.messages),
                [(TOOLS, TOOLS), (END, END)],
            )
            .add_edge(TOOLS, "agent");

        let mut options = self.options;
        if let Some(name) = self.name {
            options = options.with_name(name);
        }
        graph.compile_with(options)
    }
}

/// Compile a ReAct agent over `tools`
pub fn create_react_agent(
    model: Arc<dyn ChatModel>,
    tools: impl IntoIterator<Item = Arc<dyn Tool>>,
    prompt: Option<&str>,
) -> Result<CompiledGraph<ReactState>> {
    let mut config = ReactAgentConfig::new(model, tools.into_iter().collect());
    if let Some(prompt) = prompt {
        config = config.with_prompt(prompt);
    }
    config.build()
}

/// Run `agent` on one question and return its final answer
pub async fn ask(
    agent: &CompiledGraph<ReactState>,
    question: impl Into<String>,
    context: HashMap<String, Value>,
) -> Result<String> {
    let state = agent
        .invoke(
            ReactUpdate::default()
                .messages(vec![Message::human(question)])
                .context(context),
        )
        .await?;
    Ok(state.messages.last().map(|m| m.content.clone()).unwrap_or_default())
}
