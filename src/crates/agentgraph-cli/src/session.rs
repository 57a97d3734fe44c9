//! Agents as the binary runs them
//!
//! A [`Session`] owns the chat model, a checkpointer and a store for the
//! life of the process, so questions asked on the same thread see the
//! earlier turns. [`Agent::ask`] drives one question to its end and hands
//! every interrupt to a [`Human`].

use crate::config::AppConfig;
use agentgraph_agents::agents::deep_agent::{DeepAgent, DeepAgentState, DeepAgentUpdate};
use agentgraph_agents::agents::email::{EmailAssistant, EmailInput, EmailState, EmailUpdate};
use agentgraph_agents::agents::music_store::{MusicStore, MusicStoreState, MusicStoreUpdate};
use agentgraph_agents::agents::rag::{
    create_simple_rag, CorrectiveRag, CorrectiveRagState, CorrectiveRagUpdate, MemoryHilRag, MemoryHilState,
    MemoryHilUpdate, QueryExpansionRag, QueryExpansionState, QueryExpansionUpdate, SimpleRagState, SimpleRagUpdate,
};
use agentgraph_agents::agents::researcher::{DeepResearcher, ResearchState, ResearchUpdate};
use agentgraph_agents::agents::sql_agent::{final_answer, SqlAgent, SqlAgentState, SqlAgentUpdate};
use agentgraph_agents::agents::swarm::{create_music_store_swarm, customer_question, SwarmState};
use agentgraph_agents::retrieval::{load_documents, Retriever};
use agentgraph_agents::search::SearchResult;
use agentgraph_agents::{AgentError, InMemoryRetriever, SqlDatabase, SqliteDatabase, TavilySearch, WebSearch};
use agentgraph_core::interrupt::{Command, Interrupt};
use agentgraph_core::llm::{ChatModel, ScriptedChatModel};
use agentgraph_core::state::ListUpdate;
use agentgraph_core::{
    CheckpointSaver, CompileOptions, CompiledGraph, Document, GraphState, InMemoryCheckpointSaver, InMemoryStore,
    InterruptKind, Message, MessageRole, RunConfig, Store,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentKind {
    /// Answer questions about the Chinook database with SQL
    Sql,
    /// Retrieve, then answer
    SimpleRag,
    /// Grade documents and answers before replying
    CorrectiveRag,
    /// Rewrite the question, fan out retrieval, ask a human when nothing fits
    QueryExpansionRag,
    /// Ask the human for context on every answer, remember the conversation
    MemoryRag,
    /// Customer support for the music store
    MusicStore,
    /// Triage an email and draft a reviewed reply
    Email,
    /// Research a topic on the web and write a report
    Researcher,
    /// Music store support as invoice and catalogue agents handing off to each other
    Swarm,
    /// Plan, delegate research and write reviewed files
    DeepAgent,
}

impl AgentKind {
    pub fn needs_database(&self) -> bool {
        matches!(self, AgentKind::Sql | AgentKind::MusicStore | AgentKind::Swarm)
    }

    pub fn needs_search(&self) -> bool {
        matches!(self, AgentKind::Researcher | AgentKind::DeepAgent)
    }

    pub fn needs_documents(&self) -> bool {
        matches!(
            self,
            AgentKind::SimpleRag | AgentKind::CorrectiveRag | AgentKind::QueryExpansionRag | AgentKind::MemoryRag
        )
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{:?}", self),
        }
    }
}

/// Whoever answers interrupts
pub trait Human {
    /// Show `prompt` and read one answer; `None` when input is closed
    fn ask(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Collaborators an agent is compiled with
pub struct Deps {
    pub model: Arc<dyn ChatModel>,
    pub db: Arc<dyn SqlDatabase>,
    pub retriever: Arc<dyn Retriever>,
    pub search: Arc<dyn WebSearch>,
}

/// Search backend for runs that must not reach the network
struct NoSearch;

#[async_trait]
impl WebSearch for NoSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> agentgraph_agents::Result<Vec<SearchResult>> {
        Err(AgentError::Search("web search is not configured".to_string()))
    }
}

async fn empty_database() -> Result<Arc<dyn SqlDatabase>> {
    let db = SqliteDatabase::from_script("SELECT 1").await?;
    Ok(Arc::new(db))
}

impl Deps {
    /// Placeholders everywhere: enough to compile and draw any agent
    pub async fn offline() -> Result<Self> {
        Ok(Self {
            model: Arc::new(ScriptedChatModel::new(Vec::<Message>::new())),
            db: empty_database().await?,
            retriever: Arc::new(InMemoryRetriever::new(Vec::new())),
            search: Arc::new(NoSearch),
        })
    }

    /// What `kind` needs, from `config`; the rest stays a placeholder
    pub async fn load(kind: AgentKind, config: &AppConfig) -> Result<Self> {
        let mut deps = Self::offline().await?;
        deps.model = llm::init_chat_model(&config.model, &config.init_options())
            .with_context(|| format!("cannot initialise model '{}'", config.model))?;

        if kind.needs_database() {
            let path = config.database.display().to_string();
            let db = SqliteDatabase::connect(&path)
                .await
                .with_context(|| format!("cannot open database {}", path))?;
            deps.db = Arc::new(db);
        }
        if kind.needs_documents() {
            let docs = load_documents(&config.documents, config.chunk_size, config.chunk_overlap)
                .await
                .with_context(|| format!("cannot load documents from {}", config.documents.display()))?;
            if docs.is_empty() {
                tracing::warn!(dir = %config.documents.display(), "no .md or .txt documents found");
            }
            tracing::info!(chunks = docs.len(), "documents indexed");
            deps.retriever = Arc::new(InMemoryRetriever::new(docs));
        }
        if kind.needs_search() {
            let search = TavilySearch::from_env(&config.tavily_key_env).context("web search needs a Tavily key")?;
            deps.search = Arc::new(search);
        }
        Ok(deps)
    }
}

/// A compiled agent
#[derive(Clone)]
pub enum Agent {
    Sql(CompiledGraph<SqlAgentState>),
    SimpleRag(CompiledGraph<SimpleRagState>),
    CorrectiveRag(CompiledGraph<CorrectiveRagState>),
    QueryExpansionRag(CompiledGraph<QueryExpansionState>),
    MemoryRag(CompiledGraph<MemoryHilState>),
    MusicStore(CompiledGraph<MusicStoreState>),
    Email(CompiledGraph<EmailState>),
    Researcher(CompiledGraph<ResearchState>),
    /// The swarm and the customer it answers for
    Swarm(CompiledGraph<SwarmState>, Option<String>),
    DeepAgent(CompiledGraph<DeepAgentState>),
}

/// Process-wide persistence shared by every agent of a session
pub struct Session {
    config: AppConfig,
    checkpointer: Arc<dyn CheckpointSaver>,
    store: Arc<dyn Store>,
}

impl Session {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
            store: Arc::new(InMemoryStore::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn run_config(&self, thread: &str) -> RunConfig {
        RunConfig::for_thread(thread).with_recursion_limit(self.config.recursion_limit)
    }

    fn persistent(&self) -> CompileOptions {
        CompileOptions::new().with_checkpointer(Arc::clone(&self.checkpointer))
    }

    pub fn compile(&self, kind: AgentKind, deps: Deps) -> Result<Agent> {
        let Deps {
            model,
            db,
            retriever,
            search,
        } = deps;
        let rag = self.config.rag_options();

        let agent = match kind {
            AgentKind::Sql => Agent::Sql(SqlAgent::new(model, db).with_compile_options(self.persistent()).build()?),
            AgentKind::SimpleRag => Agent::SimpleRag(create_simple_rag(model, retriever)?),
            AgentKind::CorrectiveRag => {
                Agent::CorrectiveRag(CorrectiveRag::new(model, retriever).with_options(rag).build()?)
            }
            AgentKind::QueryExpansionRag => Agent::QueryExpansionRag(
                QueryExpansionRag::new(model, retriever)
                    .with_options(rag)
                    .with_checkpointer(Arc::clone(&self.checkpointer))
                    .build()?,
            ),
            AgentKind::MemoryRag => Agent::MemoryRag(
                MemoryHilRag::new(model, retriever)
                    .with_options(rag)
                    .with_checkpointer(Arc::clone(&self.checkpointer))
                    .build()?,
            ),
            AgentKind::MusicStore => Agent::MusicStore(
                MusicStore::new(model, db)
                    .with_compile_options(self.persistent().with_store(Arc::clone(&self.store)))
                    .build()?,
            ),
            AgentKind::Email => {
                Agent::Email(EmailAssistant::new(model).with_compile_options(self.persistent()).build()?)
            }
            AgentKind::Researcher => Agent::Researcher(
                DeepResearcher::new(model, search)
                    .with_options(self.config.research_options())
                    .with_compile_options(self.persistent())
                    .build()?,
            ),
            AgentKind::Swarm => Agent::Swarm(
                create_music_store_swarm(model, db, self.persistent())?,
                self.config.customer_id.clone(),
            ),
            AgentKind::DeepAgent => Agent::DeepAgent(
                DeepAgent::new(model, search)
                    .with_compile_options(self.persistent().with_store(Arc::clone(&self.store)))
                    .build()?,
            ),
        };
        tracing::debug!(agent = %kind, "agent compiled");
        Ok(agent)
    }
}

/// How to turn the human's text into a resume command
type Answer<U> = fn(&Interrupt, String) -> Command<U>;

fn resume_with_text<U>(_interrupt: &Interrupt, reply: String) -> Command<U> {
    Command::resume(reply)
}

/// What the human sees for `interrupt`
pub fn describe(interrupt: &Interrupt) -> String {
    if let Some(prompt) = interrupt.prompt() {
        return prompt.to_string();
    }
    match interrupt.kind {
        InterruptKind::Before | InterruptKind::After => {
            format!("The agent paused at '{}' and needs more context:", interrupt.node)
        }
        InterruptKind::Dynamic => match interrupt.value.get("description").and_then(Value::as_str) {
            Some(description) => format!(
                "{}\n\nReply with accept, ignore, edit {{json args}}, or feedback for the assistant:",
                description
            ),
            None => serde_json::to_string_pretty(&interrupt.value).unwrap_or_else(|_| interrupt.value.to_string()),
        },
    }
}

async fn drive<S: GraphState>(
    graph: &CompiledGraph<S>,
    input: S::Update,
    config: &RunConfig,
    human: &mut dyn Human,
    answer: Answer<S::Update>,
) -> Result<S> {
    let mut outcome = graph.invoke_with_config(input, config).await?;
    while outcome.is_interrupted() {
        let interrupt = outcome.interrupts()[0].clone();
        tracing::debug!(node = %interrupt.node, id = %interrupt.id, "waiting for the human");
        let reply = human
            .ask(&describe(&interrupt))?
            .ok_or_else(|| anyhow!("input closed while '{}' was waiting for an answer", interrupt.node))?;
        outcome = graph.resume(config, answer(&interrupt, reply)).await?;
    }
    Ok(outcome.into_state())
}

/// The review decision a reply stands for
///
/// `accept`, `ignore` and `edit {..}` are decisions; a JSON object with a
/// `type` is taken as is; anything else is feedback for the assistant.
pub fn review_reply(reply: &str) -> Value {
    let reply = reply.trim();
    match reply.to_ascii_lowercase().as_str() {
        "accept" | "ignore" => return json!({ "type": reply.to_ascii_lowercase() }),
        _ => {}
    }
    if let Some(args) = reply.strip_prefix("edit ") {
        if let Ok(args) = serde_json::from_str::<Value>(args) {
            return json!({ "type": "edit", "args": args });
        }
    }
    if let Ok(value) = serde_json::from_str::<Value>(reply) {
        if value.get("type").is_some() {
            return value;
        }
    }
    json!({ "type": "response", "args": reply })
}

fn review_email(_interrupt: &Interrupt, reply: String) -> Command<EmailUpdate> {
    Command::resume(review_reply(&reply))
}

/// File review decision a reply stands for
///
/// `accept`/`approve` and `ignore`/`reject` are decisions, `edit {..}`
/// gives the call new arguments, anything else is a reason for rejecting.
pub fn file_decision(interrupt: &Interrupt, reply: &str) -> Value {
    let reply = reply.trim();
    match reply.to_ascii_lowercase().as_str() {
        "accept" | "approve" => return json!({"type": "accept"}),
        "ignore" | "reject" => return json!({"type": "ignore"}),
        _ => {}
    }
    if let Some(args) = reply.strip_prefix("edit ") {
        if let Ok(args) = serde_json::from_str::<Value>(args) {
            let action = interrupt.value["action_request"]["action"].clone();
            return json!({"type": "edit", "args": {"action": action, "args": args}});
        }
    }
    if let Ok(value) = serde_json::from_str::<Value>(reply) {
        if value.get("type").is_some() || value.get("decisions").is_some() {
            return value;
        }
    }
    json!({"type": "respond", "args": reply})
}

fn review_file(interrupt: &Interrupt, reply: String) -> Command<DeepAgentUpdate> {
    Command::resume(file_decision(interrupt, &reply))
}

fn feedback_document(_interrupt: &Interrupt, reply: String) -> Command<QueryExpansionUpdate> {
    let update = if reply.trim().is_empty() {
        QueryExpansionUpdate::default()
    } else {
        QueryExpansionUpdate::default().documents(ListUpdate::Overwrite(vec![
            Document::new(reply).with_metadata("source", "human")
        ]))
    };
    Command::new().with_update(update)
}

/// A JSON [`EmailInput`], or plain text taken as the body
pub fn parse_email(text: &str) -> EmailInput {
    serde_json::from_str(text).unwrap_or_else(|_| EmailInput {
        author: "unknown".to_string(),
        to: "me".to_string(),
        subject: "(no subject)".to_string(),
        email_thread: text.to_string(),
    })
}

fn generation_or(generation: Option<String>, fallback: &str) -> String {
    generation.unwrap_or_else(|| fallback.to_string())
}

fn last_content(messages: &[Message]) -> String {
    messages.last().map(|m| m.content.clone()).unwrap_or_default()
}

impl Agent {
    pub fn name(&self) -> &str {
        match self {
            Agent::Sql(g) => g.name(),
            Agent::SimpleRag(g) => g.name(),
            Agent::CorrectiveRag(g) => g.name(),
            Agent::QueryExpansionRag(g) => g.name(),
            Agent::MemoryRag(g) => g.name(),
            Agent::MusicStore(g) => g.name(),
            Agent::Email(g) => g.name(),
            Agent::Researcher(g) => g.name(),
            Agent::Swarm(g, _) => g.name(),
            Agent::DeepAgent(g) => g.name(),
        }
    }

    pub fn draw_mermaid(&self) -> String {
        match self {
            Agent::Sql(g) => g.draw_mermaid(),
            Agent::SimpleRag(g) => g.draw_mermaid(),
            Agent::CorrectiveRag(g) => g.draw_mermaid(),
            Agent::QueryExpansionRag(g) => g.draw_mermaid(),
            Agent::MemoryRag(g) => g.draw_mermaid(),
            Agent::MusicStore(g) => g.draw_mermaid(),
            Agent::Email(g) => g.draw_mermaid(),
            Agent::Researcher(g) => g.draw_mermaid(),
            Agent::Swarm(g, _) => g.draw_mermaid(),
            Agent::DeepAgent(g) => g.draw_mermaid(),
        }
    }

    /// Run one question to its end and render the answer
    pub async fn ask(&self, question: &str, config: &RunConfig, human: &mut dyn Human) -> Result<String> {
        let rendered = match self {
            Agent::Sql(graph) => {
                let input = SqlAgentUpdate::default().messages(vec![Message::human(question)]);
                let state = drive(graph, input, config, human, resume_with_text).await?;
                final_answer(&state).to_string()
            }
            Agent::SimpleRag(graph) => {
                let input = SimpleRagUpdate::default().question(question);
                let state = drive(graph, input, config, human, resume_with_text).await?;
                generation_or(state.generation, "No answer.")
            }
            Agent::CorrectiveRag(graph) => {
                let input = CorrectiveRagUpdate::default().question(question);
                let state = drive(graph, input, config, human, resume_with_text).await?;
                match state.generation {
                    None => "No relevant documents were found.".to_string(),
                    Some(answer) if state.verified => answer,
                    Some(answer) => format!("{}\n\n(unverified: not grounded in the retrieved documents)", answer),
                }
            }
            Agent::QueryExpansionRag(graph) => {
                let input = QueryExpansionUpdate::default().question(question);
                let state = drive(graph, input, config, human, feedback_document).await?;
                generation_or(state.generation, "No answer.")
            }
            Agent::MemoryRag(graph) => {
                let input = MemoryHilUpdate::default().question(question);
                let state = drive(graph, input, config, human, resume_with_text).await?;
                generation_or(state.generation, "No relevant documents were found.")
            }
            Agent::MusicStore(graph) => {
                let input = MusicStoreUpdate::default().messages(vec![Message::human(question)]);
                let state = drive(graph, input, config, human, resume_with_text).await?;
                last_content(&state.messages)
            }
            Agent::Email(graph) => {
                let input = EmailUpdate::default().email_input(parse_email(question));
                let state = drive(graph, input, config, human, review_email).await?;
                render_email(&state)
            }
            Agent::Researcher(graph) => {
                let input = ResearchUpdate::default().messages(vec![Message::human(question)]);
                let state = drive(graph, input, config, human, resume_with_text).await?;
                state.final_report.unwrap_or_else(|| last_content(&state.messages))
            }
            Agent::Swarm(graph, customer_id) => {
                let input = customer_question(question, customer_id.as_deref());
                let state = drive(graph, input, config, human, resume_with_text).await?;
                last_content(&state.messages)
            }
            Agent::DeepAgent(graph) => {
                let input = DeepAgentUpdate::default().messages(vec![Message::human(question)]);
                let state = drive(graph, input, config, human, review_file).await?;
                render_deep_agent(&state)
            }
        };
        Ok(rendered)
    }
}

fn render_email(state: &EmailState) -> String {
    let classification = state
        .classification_decision
        .as_ref()
        .and_then(|c| serde_json::to_value(c).ok())
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unclassified".to_string());
    let mut lines = vec![format!("Classification: {}", classification)];
    lines.extend(
        state
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| format!("- {}", m.content)),
    );
    if state.ignored {
        lines.push("The draft was ignored.".to_string());
    }
    lines.join("\n")
}

fn render_deep_agent(state: &DeepAgentState) -> String {
    let mut out = last_content(&state.messages);
    let mut files: Vec<&str> = state.files.keys().map(String::as_str).collect();
    if !files.is_empty() {
        files.sort_unstable();
        out.push_str(&format!("\n\nFiles written: {}", files.join(", ")));
    }
    out
}
