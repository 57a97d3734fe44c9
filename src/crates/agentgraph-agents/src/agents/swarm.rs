//! Swarm - ReAct agents that hand the conversation to each other
//!
//! ```text
//!                 ┌──────────── (handoff) ─────────────┐
//!                 ▼                                    │
//!   START ─▶ [active agent] ──(tool calls)──▶ [agent]_tools
//!                 │    ▲                               │
//!                 │    └──────── (no handoff) ─────────┘
//!                 └──(answer)──▶ END
//! ```
//!
//! Every agent is a model with its own prompt and tools, sharing one
//! message history. A handoff tool `transfer_to_<agent>` makes `<agent>`
//! the active agent: after the tool round the conversation continues with
//! it instead of the caller. The active agent is kept in state, so the next
//! question on the same thread goes straight to whoever answered last.
//!
//! [`create_music_store_swarm`] pairs the invoice and catalogue agents of
//! the music store with a handoff to each other; the invoice agent starts.

use super::music_store::{catalog_tools, invoice_tools, INVOICE_PROMPT, MUSIC_PROMPT};
use super::react::NEED_MORE_STEPS;
use crate::error::Result as AgentResult;
use crate::sql::SqlDatabase;
use crate::tool_node::{tools_condition, ToolNode, TOOLS};
use crate::tools::{Tool, ToolContext, ToolRegistry};
use agentgraph_core::llm::{ChatModel, ChatRequest};
use agentgraph_core::messages::last_message;
use agentgraph_core::state::{AddMessages, Merge, Overwrite};
use agentgraph_core::{
    graph_state, CompileOptions, CompiledGraph, GraphError, Message, NodeContext, Result, StateGraph, END, START,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Name prefix of handoff tools
pub const HANDOFF_PREFIX: &str = "transfer_to_";

pub const INVOICE_AGENT: &str = "invoice_information_agent_with_handoff";
pub const MUSIC_AGENT: &str = "music_catalog_agent_with_handoff";

graph_state! {
    pub struct SwarmState (SwarmUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub active_agent: Option<String> => Overwrite,
        pub context: HashMap<String, Value> => Merge,
    }
}

/// Tool that passes the conversation to another agent
#[derive(Debug, Clone)]
pub struct HandoffTool {
    name: String,
    agent: String,
    description: String,
}

impl HandoffTool {
    pub fn target(&self) -> &str {
        &self.agent
    }
}

/// `transfer_to_<agent_name>`
pub fn create_handoff_tool(agent_name: impl Into<String>, description: impl Into<String>) -> HandoffTool {
    let agent = agent_name.into();
    HandoffTool {
        name: format!("{}{}", HANDOFF_PREFIX, agent),
        agent,
        description: description.into(),
    }
}

#[async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> AgentResult<String> {
        Ok(format!("Successfully transferred to {}", self.agent))
    }
}

/// One member of a swarm
pub struct SwarmAgent {
    pub name: String,
    pub model: Arc<dyn ChatModel>,
    pub tools: ToolRegistry,
    pub prompt: Option<String>,
}

impl SwarmAgent {
    pub fn new(name: impl Into<String>, model: Arc<dyn ChatModel>, tools: ToolRegistry) -> Self {
        Self {
            name: name.into(),
            model,
            tools,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SwarmOptions {
    /// Agent answering a thread's first question; the first agent otherwise
    pub default_active_agent: Option<String>,
    pub compile: CompileOptions,
}

/// Agent a handoff call in the last message transfers to
///
/// With several handoffs in one round the last one wins.
pub fn handoff_target(messages: &[Message], agents: &HashSet<String>) -> Option<String> {
    let last = last_message(messages).filter(|m| m.is_ai())?;
    last.tool_calls
        .iter()
        .filter_map(|call| call.name.strip_prefix(HANDOFF_PREFIX))
        .filter(|target| agents.contains(*target))
        .last()
        .map(str::to_string)
}

fn tools_node_name(agent: &str) -> String {
    format!("{}_{}", agent, TOOLS)
}

/// Compile `agents` into one swarm graph
pub fn create_swarm(agents: Vec<SwarmAgent>, options: SwarmOptions) -> Result<CompiledGraph<SwarmState>> {
    let names: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();
    let known: HashSet<String> = names.iter().cloned().collect();
    if names.is_empty() {
        return Err(GraphError::Validation("a swarm needs at least one agent".to_string()));
    }
    if known.len() != names.len() {
        return Err(GraphError::Validation(format!("swarm agent names must be unique: {:?}", names)));
    }
    let default_agent = options.default_active_agent.clone().unwrap_or_else(|| names[0].clone());
    if !known.contains(&default_agent) {
        return Err(GraphError::Validation(format!("default agent '{}' is not in the swarm", default_agent)));
    }
    for agent in &agents {
        for tool in agent.tools.names() {
            if let Some(target) = tool.strip_prefix(HANDOFF_PREFIX) {
                if !known.contains(target) {
                    return Err(GraphError::Validation(format!(
                        "agent '{}' hands off to unknown agent '{}'",
                        agent.name, target
                    )));
                }
            }
        }
    }

    let routes: Vec<(String, String)> = names.iter().map(|n| (n.clone(), n.clone())).collect();
    let known = Arc::new(known);
    let mut graph = StateGraph::<SwarmState>::new();

    for agent in agents {
        let SwarmAgent {
            name,
            model,
            tools,
            prompt,
        } = agent;
        let tool_node = ToolNode::new(tools);
        let definitions = tool_node.registry().definitions();
        let tools_name = tools_node_name(&name);

        let agent_name = name.clone();
        graph.add_node(name.clone(), move |state: SwarmState, ctx: NodeContext| {
            let model = Arc::clone(&model);
            let prompt = prompt.clone();
            let definitions = definitions.clone();
            let agent_name = agent_name.clone();
            async move {
                let mut messages = Vec::with_capacity(state.messages.len() + 1);
                if let Some(prompt) = prompt {
                    messages.push(Message::system(prompt));
                }
                messages.extend(state.messages);

                let mut reply = model
                    .chat(ChatRequest::new(messages).with_tools(definitions))
                    .await?
                    .message;
                if reply.has_tool_calls() && ctx.remaining_steps() < 3 {
                    tracing::warn!(agent = %agent_name, remaining = ctx.remaining_steps(), "step budget too small for another tool round");
                    reply = Message::ai(NEED_MORE_STEPS);
                }
                Ok(SwarmUpdate::default()
                    .messages(vec![reply.with_name(agent_name.clone())])
                    .active_agent(Some(agent_name)))
            }
        });

        let known_agents = Arc::clone(&known);
        graph.add_node(tools_name.clone(), move |state: SwarmState, _ctx: NodeContext| {
            let tool_node = tool_node.clone();
            let known_agents = Arc::clone(&known_agents);
            async move {
                let target = handoff_target(&state.messages, &known_agents);
                let results = tool_node.run(&state.messages, &ToolContext::from(state.context)).await?;
                let mut update = SwarmUpdate::default().messages(results);
                if let Some(target) = target {
                    tracing::info!(to = %target, "handing off");
                    update = update.active_agent(Some(target));
                }
                Ok(update)
            }
        });

        let fallback = name.clone();
        graph
            .add_conditional_edges(
                name.clone(),
                |state: &SwarmState| tools_condition(&state.messages),
                [(TOOLS.to_string(), tools_name.clone()), (END.to_string(), END.to_string())],
            )
            .add_conditional_edges(
                tools_name,
                move |state: &SwarmState| state.active_agent.clone().unwrap_or_else(|| fallback.clone()),
                routes.clone(),
            );
    }

    graph.add_conditional_edges(
        START,
        move |state: &SwarmState| match &state.active_agent {
            Some(active) => active.clone(),
            None => default_agent.clone(),
        },
        routes,
    );

    let mut compile = options.compile;
    if compile.name.is_none() {
        compile = compile.with_name("swarm");
    }
    graph.compile_with(compile)
}

/// The music store as a swarm of the invoice and catalogue agents
///
/// Invoice tools read the customer id from the `customer_id` entry of the
/// state's `context`.
pub fn create_music_store_swarm(
    model: Arc<dyn ChatModel>,
    db: Arc<dyn SqlDatabase>,
    compile: CompileOptions,
) -> Result<CompiledGraph<SwarmState>> {
    let mut invoice = invoice_tools(&db);
    invoice.register(Arc::new(create_handoff_tool(
        MUSIC_AGENT,
        "Transfer user to the music catalog information agent that can help with music catalog information",
    )));
    let mut music = catalog_tools(&db);
    music.register(Arc::new(create_handoff_tool(
        INVOICE_AGENT,
        "Transfer user to the invoice information agent that can help with invoice information",
    )));

    let agents = vec![
        SwarmAgent::new(INVOICE_AGENT, Arc::clone(&model), invoice).with_prompt(INVOICE_PROMPT),
        SwarmAgent::new(MUSIC_AGENT, model, music).with_prompt(MUSIC_PROMPT.replace("{memory}", "None")),
    ];
    create_swarm(
        agents,
        SwarmOptions {
            default_active_agent: Some(INVOICE_AGENT.to_string()),
            compile: compile.with_name("music_store_swarm"),
        },
    )
}

/// Swarm input for one customer question
pub fn customer_question(question: impl Into<String>, customer_id: Option<&str>) -> SwarmUpdate {
    let mut update = SwarmUpdate::default().messages(vec![Message::human(question)]);
    if let Some(id) = customer_id {
        update = update.context(HashMap::from([(
            super::music_store::CUSTOMER_ID.to_string(),
            json!(id),
        )]));
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::sqlite::tests::chinook;
    use crate::tools::FnTool;
    use agentgraph_core::llm::{ScriptedChatModel, ToolCall};
    use agentgraph_core::{InMemoryCheckpointSaver, MessageRole, RunConfig};

    fn echo() -> ToolRegistry {
        ToolRegistry::new().with(FnTool::new("echo", "Echo the input", json!({"type": "object", "properties": {}}), |args| {
            Ok(args.to_string())
        }))
    }

    fn call(name: &str) -> Message {
        Message::ai("").with_tool_calls(vec![ToolCall::new("h1", name, json!({}))])
    }

    fn pair(triage: ScriptedChatModel, support: ScriptedChatModel) -> Vec<SwarmAgent> {
        let mut triage_tools = echo();
        triage_tools.register(Arc::new(create_handoff_tool("support", "Pass to support")));
        vec![
            SwarmAgent::new("triage", Arc::new(triage), triage_tools).with_prompt("You are the triage agent."),
            SwarmAgent::new("support", Arc::new(support), echo()),
        ]
    }

    #[test]
    fn test_handoff_target() {
        let agents = HashSet::from(["support".to_string()]);
        assert_eq!(handoff_target(&[call("transfer_to_support")], &agents).as_deref(), Some("support"));
        assert_eq!(handoff_target(&[call("transfer_to_nobody")], &agents), None);
        assert_eq!(handoff_target(&[call("echo")], &agents), None);
        assert_eq!(handoff_target(&[Message::human("transfer_to_support")], &agents), None);
    }

    #[test]
    fn test_invalid_swarms_rejected() {
        assert!(create_swarm(Vec::new(), SwarmOptions::default()).is_err());

        let model = ScriptedChatModel::new(Vec::<Message>::new());
        let mut tools = echo();
        tools.register(Arc::new(create_handoff_tool("ghost", "Nobody")));
        let orphan = vec![SwarmAgent::new("solo", Arc::new(model.clone()), tools)];
        assert!(create_swarm(orphan, SwarmOptions::default()).is_err());

        let options = SwarmOptions {
            default_active_agent: Some("missing".to_string()),
            ..SwarmOptions::default()
        };
        assert!(create_swarm(vec![SwarmAgent::new("solo", Arc::new(model), echo())], options).is_err());
    }

    #[tokio::test]
    async fn test_first_agent_answers_directly() {
        let triage = ScriptedChatModel::new([Message::ai("Direct answer.")]);
        let support = ScriptedChatModel::new(Vec::<Message>::new());
        let swarm = create_swarm(pair(triage.clone(), support.clone()), SwarmOptions::default()).unwrap();

        let state = swarm.invoke(SwarmUpdate::default().messages(vec![Message::human("hello")])).await.unwrap();

        assert_eq!(state.messages.last().unwrap().content, "Direct answer.");
        assert_eq!(state.active_agent.as_deref(), Some("triage"));
        assert_eq!(triage.requests()[0].messages[0].content, "You are the triage agent.");
        assert!(support.requests().is_empty());
    }

    #[tokio::test]
    async fn test_handoff_routes_to_target() {
        let triage = ScriptedChatModel::new([call("transfer_to_support")]);
        let support = ScriptedChatModel::new([Message::ai("I'll help you with your issue.")]);
        let swarm = create_swarm(pair(triage, support.clone()), SwarmOptions::default()).unwrap();

        let state = swarm
            .invoke(SwarmUpdate::default().messages(vec![Message::human("I need help")]))
            .await
            .unwrap();

        let last = state.messages.last().unwrap();
        assert_eq!(last.content, "I'll help you with your issue.");
        assert_eq!(last.name.as_deref(), Some("support"));
        assert_eq!(state.active_agent.as_deref(), Some("support"));
        let transfer = state.messages.iter().find(|m| m.role == MessageRole::Tool).unwrap();
        assert_eq!(transfer.content, "Successfully transferred to support");
        // support sees the whole conversation, handoff included
        assert_eq!(support.requests()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_ordinary_tool_stays_with_agent() {
        let triage = ScriptedChatModel::new([call("echo"), Message::ai("Echoed.")]);
        let support = ScriptedChatModel::new(Vec::<Message>::new());
        let swarm = create_swarm(pair(triage, support.clone()), SwarmOptions::default()).unwrap();

        let state = swarm.invoke(SwarmUpdate::default().messages(vec![Message::human("echo")])).await.unwrap();

        assert_eq!(state.messages.last().unwrap().content, "Echoed.");
        assert_eq!(state.active_agent.as_deref(), Some("triage"));
        assert!(support.requests().is_empty());
    }

    #[tokio::test]
    async fn test_next_question_goes_to_active_agent() {
        let triage = ScriptedChatModel::new([call("transfer_to_support")]);
        let support = ScriptedChatModel::new([Message::ai("Handled."), Message::ai("Still me.")]);
        let swarm = create_swarm(
            pair(triage.clone(), support),
            SwarmOptions {
                compile: CompileOptions::new().with_checkpointer(Arc::new(InMemoryCheckpointSaver::new())),
                ..SwarmOptions::default()
            },
        )
        .unwrap();
        let config = RunConfig::for_thread("swarm");

        swarm
            .invoke_with_config(SwarmUpdate::default().messages(vec![Message::human("help")]), &config)
            .await
            .unwrap();
        let state = swarm
            .invoke_with_config(SwarmUpdate::default().messages(vec![Message::human("more help")]), &config)
            .await
            .unwrap()
            .into_state();

        assert_eq!(state.messages.last().unwrap().content, "Still me.");
        assert_eq!(triage.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_music_store_swarm_hands_invoice_question_to_catalog() {
        let model = ScriptedChatModel::from_fn(|request| {
            let system = request.messages[0].content.clone();
            let last = request.messages.last().unwrap();
            if system.starts_with("You are a subagent") {
                return Ok(call(&format!("{}{}", HANDOFF_PREFIX, MUSIC_AGENT)));
            }
            if last.role == MessageRole::Tool && last.name.as_deref() != Some("get_albums_by_artist") {
                return Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                    "c1",
                    "get_albums_by_artist",
                    json!({"artist": "AC/DC"}),
                )]));
            }
            Ok(Message::ai(format!("Catalog says: {}", last.content)))
        });
        let db: Arc<dyn SqlDatabase> = Arc::new(chinook().await);
        let swarm = create_music_store_swarm(Arc::new(model.clone()), db, CompileOptions::new()).unwrap();

        let state = swarm.invoke(customer_question("What albums does AC/DC have?", Some("1"))).await.unwrap();

        assert_eq!(swarm.name(), "music_store_swarm");
        assert_eq!(state.active_agent.as_deref(), Some(MUSIC_AGENT));
        assert_eq!(state.context.get("customer_id"), Some(&json!("1")));
        let answer = &state.messages.last().unwrap().content;
        assert!(answer.starts_with("Catalog says:"), "{answer}");
        assert!(answer.contains("Let There Be Rock"), "{answer}");
        let tools = &model.requests()[0].tools;
        assert!(tools.iter().any(|t| t.name == format!("{}{}", HANDOFF_PREFIX, MUSIC_AGENT)));
    }
}
