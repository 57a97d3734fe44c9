//! Deep agent - a planning research agent with files and a research subagent
//!
//! ```text
//!   START ──▶ agent ──(tool calls?)──▶ tools ──┐
//!               ▲            │                 │ write_file / edit_file:
//!               │            └── no ──▶ END    │ ask a human first
//!               └──────────────────────────────┘
//! ```
//!
//! Besides web search and `think_tool` the model gets
//!
//! - `write_todos`: replaces the plan kept in `todos`
//! - `task`: hands a topic to the `research-agent` subagent, a ReAct agent
//!   with search and reflection, and returns its findings
//! - `ls`, `read_file`, `write_file`, `edit_file` over the virtual
//!   filesystem of [`files`]; `/memories/` is backed by the store
//!
//! `write_file` and `edit_file` only run after review. The tools node
//! raises one [`HumanInterrupt`] per gated call, before anything runs, and
//! reads a [`HumanResponse`] back:
//!
//! - `{"type": "accept"}` or `{"type": "approve"}`: run the call
//! - `{"type": "edit", "args": {"action": .., "args": {..}}}`: run it with
//!   these arguments
//! - `{"type": "respond", "args": "why"}`: do not run it, tell the model why
//! - `{"type": "ignore"}` or `{"type": "reject"}`: do not run it
//!
//! A reply may also come wrapped as `{"decisions": [..]}`.

pub mod files;

use crate::error::{AgentError, Result as AgentResult};
use crate::search::{WebSearch, WebSearchTool};
use crate::tool_node::{tools_condition, TOOLS};
use crate::tools::{execute_tool_safely, object_schema, str_arg, string_param, FnTool, Tool, ToolContext, ToolRegistry};
use agentgraph_core::interrupt::{ActionRequest, HumanInterrupt, HumanInterruptConfig, HumanResponse};
use agentgraph_core::llm::{ChatModel, ChatRequest, ToolCall};
use agentgraph_core::messages::last_message;
use agentgraph_core::state::{AddMessages, Merge, Overwrite};
use agentgraph_core::{
    graph_state, CompileOptions, CompiledGraph, Message, NodeContext, Result, StateGraph, END, START,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::react::{ReactAgentConfig, ReactState, ReactUpdate, NEED_MORE_STEPS};
use super::researcher::today;
use super::researcher::tools::think_tool;
use files::{file_tools, Workspace, EDIT_FILE, WRITE_FILE};

pub const WRITE_TODOS: &str = "write_todos";
pub const TASK: &str = "task";
pub const RESEARCH_AGENT: &str = "research-agent";

const RESEARCHER_INSTRUCTIONS: &str = "You are a research assistant conducting research. Today's date is {date}.

<Task>
Use tools to gather information about the research topic.
</Task>

<Hard Limits>
- Simple queries: Use 2-3 search tool calls maximum
- Complex queries: Use up to 5 search tool calls maximum
- After each search, use think_tool to reflect on findings
</Hard Limits>

<Output Format>
Structure your findings with:
- Clear headings
- Inline citations [1], [2], [3]
- Sources section at the end
</Output Format>

When referencing file paths, use backtick formatting like `path/file.md` instead of markdown links.
";

const DEEP_AGENT_PROMPT: &str = "You are an expert research assistant. Today's date is {date}.

## Workflow
1. Use write_todos to plan your research
2. Delegate research to the research-agent using the task() tool
3. Synthesize findings into a comprehensive report
4. Write the final report to `/final_report.md`
5. Save key takeaways to `/memories/research_notes.md` for future reference

## Rules
- Delegate research to the research-agent rather than searching directly
- After receiving research results, synthesize and write the report yourself
- Consolidate citations (each unique URL gets one number)
- End reports with a Sources section

When referencing file paths, use backtick formatting like `path/file.md` instead of markdown links.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub content: String,
    pub status: TodoStatus,
}

graph_state! {
    pub struct DeepAgentState (DeepAgentUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub todos: Vec<Todo> => Overwrite,
        /// Thread files by absolute path; `/memories/` files live in the store
        pub files: HashMap<String, String> => Merge,
    }
}

fn parse_todos(args: &Value) -> AgentResult<Vec<Todo>> {
    let todos = args
        .get("todos")
        .cloned()
        .ok_or_else(|| AgentError::InvalidInput("missing required argument 'todos'".to_string()))?;
    Ok(serde_json::from_value(todos)?)
}

pub fn write_todos_tool() -> FnTool {
    FnTool::new(
        WRITE_TODOS,
        "Create or replace the todo list for the current task. Mark items in_progress when starting them and completed when done.",
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]}
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"]
        }),
        |args| {
            let todos = parse_todos(args)?;
            Ok(format!("Updated todo list to {}", serde_json::to_string(&todos)?))
        },
    )
}

/// `task` tool delegating to a named subagent
pub struct TaskTool {
    subagents: HashMap<String, CompiledGraph<ReactState>>,
    description: String,
}

impl TaskTool {
    pub fn new() -> Self {
        Self {
            subagents: HashMap::new(),
            description: "Launch a subagent to handle a task on its own. Available agents:".to_string(),
        }
    }

    pub fn with_subagent(mut self, name: &str, description: &str, agent: CompiledGraph<ReactState>) -> Self {
        self.description.push_str(&format!("\n- {}: {}", name, description));
        self.subagents.insert(name.to_string(), agent);
        self
    }
}

impl Default for TaskTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        TASK
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        object_schema([
            ("description", string_param("The task, with everything the subagent needs to know")),
            ("subagent_type", string_param("Name of the subagent to use")),
        ])
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> AgentResult<String> {
        let task = str_arg(&args, "description")?;
        let kind = str_arg(&args, "subagent_type")?;
        let agent = self.subagents.get(kind).ok_or_else(|| {
            let mut known: Vec<&str> = self.subagents.keys().map(String::as_str).collect();
            known.sort_unstable();
            AgentError::InvalidInput(format!("unknown subagent '{}'; available: {:?}", kind, known))
        })?;
        tracing::info!(subagent = %kind, "delegating task");
        let state = agent
            .invoke(ReactUpdate::default().messages(vec![Message::human(task)]))
            .await?;
        Ok(last_message(&state.messages).map(|m| m.content.clone()).unwrap_or_default())
    }
}

/// Review payload for a gated file call
fn file_review(call: &ToolCall) -> HumanInterrupt {
    let path = call.str_arg("file_path").unwrap_or_default();
    HumanInterrupt {
        action_request: ActionRequest {
            action: call.name.clone(),
            args: call.arguments.clone(),
        },
        config: HumanInterruptConfig::all(),
        description: Some(format!("Tool execution requires approval\n\nTool: {}\nFile: {}", call.name, path)),
    }
}

/// Reviewer reply, bare or wrapped as `{"decisions": [..]}`
fn parse_decision(value: Value) -> AgentResult<HumanResponse> {
    let decision = match value.get("decisions").and_then(Value::as_array) {
        Some(decisions) => decisions
            .first()
            .cloned()
            .ok_or_else(|| AgentError::InvalidInput("empty decisions list".to_string()))?,
        None => value,
    };
    Ok(serde_json::from_value(decision)?)
}

/// Builder for the deep agent graph
pub struct DeepAgent {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn WebSearch>,
    interrupt_on: HashSet<String>,
    options: CompileOptions,
}

impl DeepAgent {
    pub fn new(model: Arc<dyn ChatModel>, search: Arc<dyn WebSearch>) -> Self {
        Self {
            model,
            search,
            interrupt_on: HashSet::from([WRITE_FILE.to_string(), EDIT_FILE.to_string()]),
            options: CompileOptions::new(),
        }
    }

    /// Tools that wait for review; `write_file` and `edit_file` by default
    pub fn with_interrupt_on<I, T>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.interrupt_on = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Review needs a checkpointer; `/memories/` needs a store
    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    fn research_agent(&self) -> Result<CompiledGraph<ReactState>> {
        let tools = ToolRegistry::new()
            .with(WebSearchTool::new(Arc::clone(&self.search)).with_max_results(3))
            .with(think_tool());
        ReactAgentConfig::new(Arc::clone(&self.model), tools)
            .with_prompt(RESEARCHER_INSTRUCTIONS.replace("{date}", &today()))
            .with_name(RESEARCH_AGENT)
            .build()
    }

    pub fn build(self) -> Result<CompiledGraph<DeepAgentState>> {
        let task = TaskTool::new().with_subagent(
            RESEARCH_AGENT,
            "Delegate research tasks. Give one topic at a time.",
            self.research_agent()?,
        );
        let base = ToolRegistry::new()
            .with(WebSearchTool::new(Arc::clone(&self.search)).with_max_results(3))
            .with(think_tool())
            .with(write_todos_tool())
            .with(task);
        let definitions: Vec<_> = base
            .definitions()
            .into_iter()
            .chain(file_tools(Arc::new(Workspace::new(HashMap::new(), None))).definitions())
            .collect();
        let base = Arc::new(base);
        let gated = Arc::new(self.interrupt_on);
        let model = self.model;

        let mut graph = StateGraph::<DeepAgentState>::new();

        graph.add_node("agent", move |state: DeepAgentState, ctx: NodeContext| {
            let model = Arc::clone(&model);
            let definitions = definitions.clone();
            async move {
                let request = ChatRequest::new(state.messages)
                    .with_system(DEEP_AGENT_PROMPT.replace("{date}", &today()))
                    .with_tools(definitions);
                let mut reply = model.chat(request).await?.message;
                if reply.has_tool_calls() && ctx.remaining_steps() < 3 {
                    tracing::warn!(remaining = ctx.remaining_steps(), "step budget too small for another tool round");
                    reply = Message::ai(NEED_MORE_STEPS);
                }
                Ok(DeepAgentUpdate::default().messages(vec![reply]))
            }
        });

        graph.add_node(TOOLS, move |state: DeepAgentState, ctx: NodeContext| {
            let base = Arc::clone(&base);
            let gated = Arc::clone(&gated);
            async move {
                let Some(last) = last_message(&state.messages).filter(|m| m.is_ai()).cloned() else {
                    return Ok(DeepAgentUpdate::default());
                };

                // every review happens before anything runs, so a re-run repeats no call
                let mut decisions = Vec::with_capacity(last.tool_calls.len());
                for call in &last.tool_calls {
                    if gated.contains(&call.name) {
                        let request = serde_json::to_value(file_review(call))?;
                        let decision = parse_decision(ctx.interrupt(request)?)?;
                        tracing::info!(tool = %call.name, decision = ?decision, "file change reviewed");
                        decisions.push(Some(decision));
                    } else {
                        decisions.push(None);
                    }
                }

                let workspace = Arc::new(Workspace::new(state.files, ctx.store().cloned()));
                let mut registry = (*base).clone();
                registry.extend(file_tools(Arc::clone(&workspace)).iter().cloned());
                let tool_ctx = ToolContext::new();

                let mut results = Vec::new();
                let mut revised = last.clone();
                let mut edited = false;
                let mut todos = None;
                for (index, (call, decision)) in last.tool_calls.iter().zip(decisions).enumerate() {
                    let path = call.str_arg("file_path").unwrap_or_default().to_string();
                    let call = match decision {
                        None | Some(HumanResponse::Accept) => call.clone(),
                        Some(HumanResponse::Edit(request)) => {
                            let call = ToolCall::new(call.id.clone(), call.name.clone(), request.args);
                            revised.tool_calls[index] = call.clone();
                            edited = true;
                            call
                        }
                        Some(HumanResponse::Respond(reason)) => {
                            let content = format!("User rejected the {} call on {}: {}", call.name, path, reason);
                            results.push(Message::tool(content, call.id.clone()).with_name(call.name.clone()));
                            continue;
                        }
                        Some(HumanResponse::Ignore) => {
                            let content = format!("User rejected the {} call on {}", call.name, path);
                            results.push(Message::tool(content, call.id.clone()).with_name(call.name.clone()));
                            continue;
                        }
                    };
                    let output = execute_tool_safely(&registry, &call, &tool_ctx).await;
                    if call.name == WRITE_TODOS {
                        if let Ok(list) = parse_todos(&call.arguments) {
                            todos = Some(list);
                        }
                    }
                    results.push(Message::tool(output, call.id.clone()).with_name(call.name.clone()));
                }

                if edited {
                    // same id, so the reviewed arguments replace the proposal
                    results.insert(0, revised);
                }
                let mut update = DeepAgentUpdate::default()
                    .messages(results)
                    .files(workspace.changed().await);
                if let Some(todos) = todos {
                    update = update.todos(todos);
                }
                Ok(update)
            }
        });

        graph
            .add_edge(START, "agent")
            .add_conditional_edges(
                "agent",
                |state: &DeepAgentState| tools_condition(&state.messages),
                [(TOOLS, TOOLS), (END, END)],
            )
            .add_edge(TOOLS, "agent");

        let mut options = self.options;
        if options.name.is_none() {
            options = options.with_name("deep_agent");
        }
        graph.compile_with(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::{result, CannedSearch};
    use agentgraph_core::llm::ScriptedChatModel;
    use agentgraph_core::{Command, InMemoryCheckpointSaver, InMemoryStore, MessageRole, RunConfig, RunOutcome, Store};
    use files::{memories_namespace, READ_FILE};

    fn report_call(path: &str, content: &str) -> Message {
        Message::ai("").with_tool_calls(vec![ToolCall::new(
            "w1",
            WRITE_FILE,
            json!({"file_path": path, "content": content}),
        )])
    }

    /// Writes the report on the first turn and reports the tool output after
    fn writer(path: &'static str) -> ScriptedChatModel {
        ScriptedChatModel::from_fn(move |request| {
            let last = request.messages.last().unwrap();
            if last.role == MessageRole::Tool {
                return Ok(Message::ai(format!("Finished: {}", last.content)));
            }
            Ok(report_call(path, "# Rust\n\nRust is fast."))
        })
    }

    fn agent(model: &ScriptedChatModel, store: Option<Arc<InMemoryStore>>) -> CompiledGraph<DeepAgentState> {
        let mut options = CompileOptions::new().with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()));
        if let Some(store) = store {
            options = options.with_store(store);
        }
        DeepAgent::new(Arc::new(model.clone()), Arc::new(CannedSearch::default()))
            .with_compile_options(options)
            .build()
            .unwrap()
    }

    async fn ask(graph: &CompiledGraph<DeepAgentState>, thread: &str, question: &str) -> RunOutcome<DeepAgentState> {
        graph
            .invoke_with_config(
                DeepAgentUpdate::default().messages(vec![Message::human(question)]),
                &RunConfig::for_thread(thread),
            )
            .await
            .unwrap()
    }

    async fn decide(graph: &CompiledGraph<DeepAgentState>, thread: &str, decision: Value) -> DeepAgentState {
        graph
            .resume(&RunConfig::for_thread(thread), Command::resume(decision))
            .await
            .unwrap()
            .into_state()
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!(parse_decision(json!({"type": "accept"})).unwrap(), HumanResponse::Accept);
        assert_eq!(
            parse_decision(json!({"decisions": [{"type": "approve"}]})).unwrap(),
            HumanResponse::Accept
        );
        assert_eq!(parse_decision(json!({"type": "reject"})).unwrap(), HumanResponse::Ignore);
        assert!(parse_decision(json!({"decisions": []})).is_err());
        assert!(parse_decision(json!("yes")).is_err());
    }

    #[tokio::test]
    async fn test_write_waits_for_approval() {
        let model = writer("/final_report.md");
        let graph = agent(&model, None);

        let outcome = ask(&graph, "approve", "Research Rust").await;
        assert!(outcome.is_interrupted());
        assert!(outcome.state().files.is_empty());
        let request: HumanInterrupt = serde_json::from_value(outcome.interrupts()[0].value.clone()).unwrap();
        assert_eq!(request.action_request.action, WRITE_FILE);
        assert_eq!(request.action_request.args["file_path"], "/final_report.md");

        let state = decide(&graph, "approve", json!({"decisions": [{"type": "approve"}]})).await;
        assert_eq!(
            state.files.get("/final_report.md").map(String::as_str),
            Some("# Rust\n\nRust is fast.")
        );
        assert_eq!(state.messages.last().unwrap().content, "Finished: Updated file /final_report.md");
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_applied() {
        let model = writer("/final_report.md");
        let graph = agent(&model, None);
        ask(&graph, "reject", "Research Rust").await;

        let state = decide(&graph, "reject", json!({"type": "reject"})).await;
        assert!(state.files.is_empty());
        assert_eq!(
            state.messages.last().unwrap().content,
            "Finished: User rejected the write_file call on /final_report.md"
        );

        let graph = agent(&model, None);
        ask(&graph, "respond", "Research Rust").await;
        let state = decide(&graph, "respond", json!({"type": "respond", "args": "cite sources first"})).await;
        assert!(state.files.is_empty());
        assert!(state.messages.last().unwrap().content.ends_with(": cite sources first"));
    }

    #[tokio::test]
    async fn test_edit_replaces_arguments() {
        let model = writer("/final_report.md");
        let graph = agent(&model, None);
        ask(&graph, "edit", "Research Rust").await;

        let edited = json!({"file_path": "/final_report.md", "content": "# Rust\n\nReviewed."});
        let state = decide(
            &graph,
            "edit",
            json!({"type": "edit", "args": {"action": WRITE_FILE, "args": edited}}),
        )
        .await;

        assert_eq!(
            state.files.get("/final_report.md").map(String::as_str),
            Some("# Rust\n\nReviewed.")
        );
        let proposal = state.messages.iter().find(|m| m.has_tool_calls()).unwrap();
        assert_eq!(proposal.tool_calls[0].arguments["content"], "# Rust\n\nReviewed.");
    }

    #[tokio::test]
    async fn test_memories_outlive_the_thread() {
        let store = Arc::new(InMemoryStore::new());
        let model = ScriptedChatModel::from_fn(|request| {
            let last = request.messages.last().unwrap();
            match (last.role, last.content.as_str()) {
                (MessageRole::Human, "Save notes") => Ok(report_call("/memories/research_notes.md", "Rust is fast.")),
                (MessageRole::Human, _) => Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                    "r1",
                    READ_FILE,
                    json!({"file_path": "/memories/research_notes.md"}),
                )])),
                _ => Ok(Message::ai(format!("Notes: {}", last.content))),
            }
        });
        let graph = agent(&model, Some(Arc::clone(&store)));

        ask(&graph, "first", "Save notes").await;
        let state = decide(&graph, "first", json!({"type": "accept"})).await;
        assert!(state.files.is_empty());
        let item = store.get(&memories_namespace(), "research_notes.md").await.unwrap().unwrap();
        assert_eq!(item.value["content"], "Rust is fast.");

        // reads are not reviewed
        let outcome = ask(&graph, "second", "What did we learn?").await;
        assert!(!outcome.is_interrupted());
        assert_eq!(outcome.state().messages.last().unwrap().content, "Notes:      1\tRust is fast.");
    }

    #[tokio::test]
    async fn test_plans_and_delegates_research() {
        let search = Arc::new(CannedSearch {
            results: vec![result("Tokio", "https://tokio.rs")],
            ..Default::default()
        });
        let model = ScriptedChatModel::from_fn(|request| {
            let system = request.messages[0].content.clone();
            let last = request.messages.last().unwrap();
            if system.starts_with("You are a research assistant") {
                if last.role == MessageRole::Human {
                    return Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                        "s1",
                        "web_search",
                        json!({"query": "async runtimes"}),
                    )]));
                }
                return Ok(Message::ai(format!("Findings: {}", last.content)));
            }
            if last.role == MessageRole::Human {
                return Ok(Message::ai("").with_tool_calls(vec![
                    ToolCall::new(
                        "t1",
                        WRITE_TODOS,
                        json!({"todos": [
                            {"content": "Research runtimes", "status": "in_progress"},
                            {"content": "Write report", "status": "pending"}
                        ]}),
                    ),
                    ToolCall::new(
                        "t2",
                        TASK,
                        json!({"description": "Compare async runtimes", "subagent_type": RESEARCH_AGENT}),
                    ),
                ]));
            }
            Ok(Message::ai("Research done."))
        });
        let graph = DeepAgent::new(Arc::new(model), search.clone()).build().unwrap();

        let state = graph
            .invoke(DeepAgentUpdate::default().messages(vec![Message::human("Compare async runtimes")]))
            .await
            .unwrap();

        assert_eq!(graph.name(), "deep_agent");
        assert_eq!(state.todos.len(), 2);
        assert_eq!(state.todos[0].status, TodoStatus::InProgress);
        let delegated = state.messages.iter().find(|m| m.name.as_deref() == Some(TASK)).unwrap();
        assert!(delegated.content.starts_with("Findings:"));
        assert!(delegated.content.contains("About Tokio"));
        assert_eq!(search.queries.lock().as_slice(), ["async runtimes"]);
        assert_eq!(state.messages.last().unwrap().content, "Research done.");
    }

    #[tokio::test]
    async fn test_unknown_subagent() {
        let task = TaskTool::new();
        let err = task
            .execute(json!({"description": "x", "subagent_type": "coder"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown subagent 'coder'"));
    }
}
