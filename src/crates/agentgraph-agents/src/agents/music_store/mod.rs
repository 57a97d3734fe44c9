//! Music store customer support with account verification and memory
//!
//! ```text
//!   START ─▶ verify_info ──(continue)──▶ load_memory ─▶ supervisor ─▶ create_memory ─▶ END
//!                ▲    │
//!                │ (interrupt)
//!                │    ▼
//!                └─ human_input
//! ```
//!
//! Nothing is answered before the customer is verified. `verify_info`
//! extracts an identifier (customer id, phone number or email) from the
//! latest message and resolves it against the `Customer` table; until that
//! succeeds the model asks for it and `human_input` waits for the reply.
//!
//! The supervisor is a ReAct agent whose tools are two subagents, one for
//! the catalogue and one for invoices. The verified customer id and the
//! saved preferences reach the subagent tools through the tool context,
//! never through model-chosen arguments.
//!
//! Preferences live in the long-term store under
//! `("memory_profile", customer_id)` / `"user_memory"` as
//! `{"memory": {"customer_id": .., "music_preferences": [..]}}`. They are
//! loaded before the supervisor runs and rewritten wholesale after it.

pub mod tools;

pub use tools::{
    catalog_tools, customer_id_from_identifier, invoice_tools, CatalogLookup, CatalogTool, InvoiceLookup,
    InvoiceTool, CUSTOMER_ID, LOADED_MEMORY,
};

use super::react::{ReactAgentConfig, ReactState, ReactUpdate};
use super::resume_text;
use crate::error::Result as AgentResult;
use crate::sql::SqlDatabase;
use crate::tools::{object_schema, str_arg, string_param, Tool, ToolContext, ToolRegistry};
use agentgraph_core::llm::{with_structured_output, ChatModel};
use agentgraph_core::memory::{load_profile, profile_namespace, save_profile};
use agentgraph_core::messages::{get_buffer_string, last_message};
use agentgraph_core::state::{AddMessages, Overwrite};
use agentgraph_core::{
    graph_state, CompileOptions, CompiledGraph, Message, NodeContext, Result, StateGraph, END, START,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Store namespace scope of customer profiles
pub const MEMORY_SCOPE: &str = "memory_profile";
/// Store key of a customer profile
pub const MEMORY_KEY: &str = "user_memory";

const EXTRACT_IDENTIFIER_PROMPT: &str = "You are a customer service representative responsible for extracting customer identifier.
Only extract the customer's account information from the message history.
If they haven't provided the information yet, return an empty string for the file";

const VERIFY_PROMPT: &str = "You are a music store agent, where you are trying to verify the customer identity as the first step of the customer support process.
Only after their account is verified, you would be able to support them on resolving the issue.
In order to verify their identity, one of their customer ID, email, or phone number needs to be provided.
If the customer has not provided their identifier, please ask them for it.
If they have provided the identifier but cannot be found, please ask them to revise it.";

const SUPERVISOR_PROMPT: &str = "You are an expert customer support assistant for a digital music store. You can handle music catalog or invoice related question regarding past purchases, song or album availabilities.
You are dedicated to providing exceptional service and ensuring customer queries are answered thoroughly, and have a team of subagents that you can use to help answer queries from customers.
Your primary role is to serve as a supervisor/planner for this multi-agent team that helps answer queries from customers. Always respond to the customer through summarizing the conversation, including individual responses from subagents.
If a question is unrelated to music or invoice, politely remind the customer regarding your scope of work. Do not answer unrelated answers.

Your team is composed of two subagents that you can use to help answer the customer's request:
1. music_catalog_subagent: this subagent has access to user's saved music preferences. It can also retrieve information about the digital music store's music catalog (albums, tracks, songs, etc.) from the database.
2. invoice_information_subagent: this subagent is able to retrieve information about a customer's past purchases or invoices from the database.

Based on the existing steps that have been taken in the messages, your role is to call the appropriate subagent based on the users query.";

pub(crate) const MUSIC_PROMPT: &str = "You are a member of the assistant team, your role specifically is to focused on helping customers discover and learn about music in our digital catalog.
If you are unable to find playlists, songs, or albums associated with an artist, it is okay.
Just inform the customer that the catalog does not have any playlists, songs, or albums associated with that artist.
You also have context on any saved user preferences, helping you to tailor your response.

CORE RESPONSIBILITIES:
- Search and provide accurate information about songs, albums, artists, and playlists
- Offer relevant recommendations based on customer interests
- Handle music-related queries with attention to detail
- Help customers discover new music they might enjoy
- You are routed only when there are questions related to music catalog; ignore other questions.

SEARCH GUIDELINES:
1. Always perform thorough searches before concluding something is unavailable
2. If exact matches aren't found, try:
   - Checking for alternative spellings
   - Looking for similar artist names
   - Searching by partial matches
3. When providing song lists:
   - Include the artist name with each song
   - Mention the album when relevant

Additional context is provided below:

Prior saved user preferences: {memory}

Message history is also attached.";

pub(crate) const INVOICE_PROMPT: &str = "You are a subagent among a team of assistants. You are specialized for retrieving and processing invoice information. You are routed for invoice-related portion of the questions, so only respond to them.

You have access to three tools. These tools enable you to retrieve and process invoice information from the database. Here are the tools:
- get_invoices_by_customer_sorted_by_date: This tool retrieves all invoices for a customer, sorted by invoice date.
- get_invoices_sorted_by_unit_price: This tool retrieves all invoices for a customer, sorted by unit price.
- get_employee_by_invoice_and_customer: This tool retrieves the employee information associated with an invoice and a customer.

If you are unable to retrieve the invoice information, inform the customer you are unable to retrieve the information, and ask if they would like to search for something else.

CORE RESPONSIBILITIES:
- Retrieve and process invoice information from the database
- Provide detailed information about invoices, including customer details, invoice dates, total amounts, employees associated with the invoice, etc. when the customer asks for it.
- Always maintain a professional, friendly, and patient demeanor";

const CREATE_MEMORY_PROMPT: &str = "You are an expert analyst that is observing a conversation that has taken place between a customer and a customer support assistant. The customer support assistant works for a digital music store, and has utilized a multi-agent team to answer the customer's request.
You are tasked with analyzing the conversation that has taken place between the customer and the customer support assistant, and updating the memory profile associated with the customer.
You specifically care about saving any music interest the customer has shared about themselves, particularly their music preferences to their memory profile.

<core_instructions>
1. The memory profile may be empty. If it's empty, you should ALWAYS create a new memory profile for the customer.
2. You should identify any music interest the customer during the conversation and add it to the memory profile **IF** it is not already present.
3. For each key in the memory profile, if there is no new information, do NOT update the value - keep the existing value unchanged.
4. ONLY update the values in the memory profile if there is new information.
</core_instructions>

<expected_format>
The customer's memory profile should have the following fields:
- customer_id: the customer ID of the customer
- music_preferences: the music preferences of the customer

IMPORTANT: ENSURE your response is an object with these fields.
</expected_format>

<important_context>
The conversation between the customer and the customer support assistant that you should analyze is as follows:
{conversation}

The existing memory profile associated with the customer that you should either update or create based on the conversation is as follows:
{memory_profile}
</important_context>";

const UPDATE_MEMORY_REQUEST: &str =
    "Please analyze the conversation and update the customer's memory profile according to the instructions.";

/// Reply that suspends the run while waiting for the customer
pub const ASK_FOR_INPUT: &str = "Please provide input.";

graph_state! {
    pub struct MusicStoreState (MusicStoreUpdate) {
        pub messages: Vec<Message> => AddMessages,
        pub customer_id: Option<String> => Overwrite,
        pub loaded_memory: Option<String> => Overwrite,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UserInput {
    #[serde(default)]
    identifier: String,
}

/// Saved customer preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub music_preferences: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredProfile {
    #[serde(default)]
    memory: UserProfile,
}

/// `"Music Preferences: rock, jazz"`, or empty without preferences
pub fn format_user_memory(profile: &UserProfile) -> String {
    if profile.music_preferences.is_empty() {
        String::new()
    } else {
        format!("Music Preferences: {}", profile.music_preferences.join(", "))
    }
}

/// `continue` once a customer is verified, `interrupt` otherwise
pub fn should_interrupt(state: &MusicStoreState) -> &'static str {
    if state.customer_id.is_some() {
        "continue"
    } else {
        "interrupt"
    }
}

/// A compiled subagent exposed to the supervisor as a tool taking `query`
pub struct SubagentTool {
    name: &'static str,
    description: &'static str,
    agent: CompiledGraph<ReactState>,
    prompt: fn(&ToolContext) -> String,
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> Value {
        object_schema([("query", string_param("The customer's request for this subagent"))])
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> AgentResult<String> {
        let query = str_arg(&args, "query")?;
        tracing::debug!(subagent = self.name, query, "delegating");
        let state = self
            .agent
            .invoke(
                ReactUpdate::default()
                    .messages(vec![Message::system((self.prompt)(ctx)), Message::human(query)])
                    .context(ctx.to_map()),
            )
            .await?;
        Ok(last_message(&state.messages).map(|m| m.content.clone()).unwrap_or_default())
    }
}

fn music_prompt(ctx: &ToolContext) -> String {
    let memory = ctx
        .get::<String>(LOADED_MEMORY)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "None".to_string());
    MUSIC_PROMPT.replace("{memory}", &memory)
}

fn invoice_prompt(_ctx: &ToolContext) -> String {
    INVOICE_PROMPT.to_string()
}

/// Catalogue subagent tool
pub fn music_catalog_subagent(model: Arc<dyn ChatModel>, db: &Arc<dyn SqlDatabase>) -> Result<SubagentTool> {
    let agent = ReactAgentConfig::new(model, catalog_tools(db))
        .with_name("music_catalog_subagent")
        .build()?;
    Ok(SubagentTool {
        name: "music_catalog_subagent",
        description: "An agent that can assistant with all music-related queries. This agent has access to user's saved music preferences. It can also retrieve information about the digital music store's music catalog (albums, tracks, songs, etc.) from the database.",
        agent,
        prompt: music_prompt,
    })
}

/// Invoice subagent tool
pub fn invoice_information_subagent(model: Arc<dyn ChatModel>, db: &Arc<dyn SqlDatabase>) -> Result<SubagentTool> {
    let agent = ReactAgentConfig::new(model, invoice_tools(db))
        .with_name("invoice_information_subagent")
        .build()?;
    Ok(SubagentTool {
        name: "invoice_information_subagent",
        description: "An agent that can assistant with all invoice-related queries. It can retrieve information about a customers past purchases or invoices.",
        agent,
        prompt: invoice_prompt,
    })
}

/// Builder for the music store graph
///
/// Compile options must carry a store for the memory nodes and a
/// checkpointer for `human_input` to suspend.
pub struct MusicStore {
    model: Arc<dyn ChatModel>,
    db: Arc<dyn SqlDatabase>,
    options: CompileOptions,
}

impl MusicStore {
    pub fn new(model: Arc<dyn ChatModel>, db: Arc<dyn SqlDatabase>) -> Self {
        Self {
            model,
            db,
            options: CompileOptions::new(),
        }
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<CompiledGraph<MusicStoreState>> {
        let subagents: ToolRegistry = [
            Arc::new(music_catalog_subagent(Arc::clone(&self.model), &self.db)?) as Arc<dyn Tool>,
            Arc::new(invoice_information_subagent(Arc::clone(&self.model), &self.db)?) as Arc<dyn Tool>,
        ]
        .into_iter()
        .collect();
        let supervisor = ReactAgentConfig::new(Arc::clone(&self.model), subagents)
            .with_prompt(SUPERVISOR_PROMPT)
            .with_name("supervisor")
            .build()?;

        let verify_model = Arc::clone(&self.model);
        let memory_model = Arc::clone(&self.model);
        let db = self.db;

        let mut graph = StateGraph::<MusicStoreState>::new();

        graph.add_node("verify_info", move |state: MusicStoreState, _ctx: NodeContext| {
            let model = Arc::clone(&verify_model);
            let db = Arc::clone(&db);
            async move {
                if state.customer_id.is_some() {
                    return Ok(MusicStoreUpdate::default());
                }
                let latest = last_message(&state.messages).cloned().unwrap_or_else(|| Message::human(""));
                let extractor = with_structured_output::<UserInput>(
                    Arc::clone(&model),
                    "UserInput",
                    json!({
                        "type": "object",
                        "properties": {"identifier": {
                            "type": "string",
                            "description": "Identifier, which can be a customer ID, email, or phone number."
                        }},
                        "required": ["identifier"]
                    }),
                );
                let parsed = extractor
                    .invoke(vec![Message::system(EXTRACT_IDENTIFIER_PROMPT), latest])
                    .await?;

                if let Some(customer_id) = customer_id_from_identifier(db.as_ref(), &parsed.identifier).await? {
                    tracing::info!(customer_id = %customer_id, "customer verified");
                    let thanks = Message::ai(format!(
                        "Thank you for providing your information! I was able to verify your account with customer id {}.",
                        customer_id
                    ));
                    return Ok(MusicStoreUpdate::default()
                        .customer_id(Some(customer_id))
                        .messages(vec![thanks]));
                }

                let mut messages = vec![Message::system(VERIFY_PROMPT)];
                messages.extend(state.messages);
                let reply = model.invoke(messages).await?;
                Ok(MusicStoreUpdate::default().messages(vec![reply]))
            }
        });

        graph.add_node("human_input", |_state: MusicStoreState, ctx: NodeContext| async move {
            let reply = resume_text(ctx.interrupt(ASK_FOR_INPUT)?);
            Ok(MusicStoreUpdate::default().messages(vec![Message::human(reply)]))
        });

        graph.add_node("load_memory", |state: MusicStoreState, ctx: NodeContext| async move {
            let customer_id = state.customer_id.unwrap_or_default();
            let store = ctx.require_store()?;
            let stored: StoredProfile =
                load_profile(store.as_ref(), &profile_namespace(MEMORY_SCOPE, &customer_id), MEMORY_KEY).await?;
            Ok(MusicStoreUpdate::default().loaded_memory(Some(format_user_memory(&stored.memory))))
        });

        graph.add_node("supervisor", move |state: MusicStoreState, _ctx: NodeContext| {
            let supervisor = supervisor.clone();
            async move {
                let context: HashMap<String, Value> = [
                    (CUSTOMER_ID.to_string(), json!(state.customer_id)),
                    (LOADED_MEMORY.to_string(), json!(state.loaded_memory)),
                ]
                .into_iter()
                .collect();
                let result = supervisor
                    .invoke(ReactUpdate::default().messages(state.messages).context(context))
                    .await?;
                Ok(MusicStoreUpdate::default().messages(result.messages))
            }
        });

        graph.add_node("create_memory", move |state: MusicStoreState, ctx: NodeContext| {
            let model = Arc::clone(&memory_model);
            async move {
                let customer_id = state.customer_id.unwrap_or_default();
                let store = ctx.require_store()?;
                let prompt = CREATE_MEMORY_PROMPT
                    .replace("{conversation}", &get_buffer_string(&state.messages))
                    .replace("{memory_profile}", state.loaded_memory.as_deref().unwrap_or_default());
                let profile = with_structured_output::<UserProfile>(
                    model,
                    "UserProfile",
                    json!({
                        "type": "object",
                        "properties": {
                            "customer_id": {"type": "string", "description": "The customer ID of the customer"},
                            "music_preferences": {
                                "type": "array",
                                "items": {"type": "string"},
                                "description": "The music preferences of the customer"
                            }
                        },
                        "required": ["customer_id", "music_preferences"]
                    }),
                )
                .invoke(vec![Message::system(prompt), Message::human(UPDATE_MEMORY_REQUEST)])
                .await?;

                save_profile(
                    store.as_ref(),
                    &profile_namespace(MEMORY_SCOPE, &customer_id),
                    MEMORY_KEY,
                    &StoredProfile { memory: profile },
                )
                .await?;
                Ok(MusicStoreUpdate::default())
            }
        });

        graph
            .add_edge(START, "verify_info")
            .add_conditional_edges(
                "verify_info",
                should_interrupt,
                [("continue", "load_memory"), ("interrupt", "human_input")],
            )
            .add_edge("human_input", "verify_info")
            .add_edge("load_memory", "supervisor")
            .add_edge("supervisor", "create_memory")
            .add_edge("create_memory", END);

        graph.compile_with(self.options.with_name("music_store"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::sqlite::tests::chinook;
    use agentgraph_core::llm::{ChatRequest, ResponseFormat, ScriptedChatModel, ToolCall};
    use agentgraph_core::{Command, InMemoryCheckpointSaver, InMemoryStore, MessageRole, RunConfig, Store};

    fn schema_name(request: &ChatRequest) -> Option<&str> {
        match &request.response_format {
            Some(ResponseFormat::JsonSchema { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }

    fn offers(request: &ChatRequest, tool: &str) -> bool {
        request.tools.iter().any(|t| t.name == tool)
    }

    /// Verifies by email, routes invoice questions and remembers "rock"
    fn store_model() -> ScriptedChatModel {
        ScriptedChatModel::from_fn(|request| {
            let last = request.messages.last().cloned().unwrap_or_else(|| Message::human(""));
            match schema_name(request) {
                Some("UserInput") => {
                    let identifier = last
                        .content
                        .split_whitespace()
                        .find(|w| w.contains('@') || w.chars().all(|c| c.is_ascii_digit()))
                        .unwrap_or_default();
                    return Ok(Message::ai(json!({ "identifier": identifier }).to_string()));
                }
                Some("UserProfile") => {
                    return Ok(Message::ai(r#"{"customer_id": "1", "music_preferences": ["rock"]}"#));
                }
                Some(other) => panic!("unexpected schema {other}"),
                None => {}
            }
            let answered = last.role == MessageRole::Tool;
            if offers(request, "invoice_information_subagent") {
                if answered {
                    return Ok(Message::ai(format!("Here is what I found: {}", last.content)));
                }
                return Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                    "sup_1",
                    "invoice_information_subagent",
                    json!({"query": "most recent invoice"}),
                )]));
            }
            if offers(request, "get_invoices_by_customer_sorted_by_date") {
                if answered {
                    return Ok(Message::ai(last.content));
                }
                return Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
                    "inv_1",
                    "get_invoices_by_customer_sorted_by_date",
                    json!({}),
                )]));
            }
            Ok(Message::ai("Could you share your customer ID, email, or phone number?"))
        })
    }

    async fn music_store(model: &ScriptedChatModel, store: Arc<InMemoryStore>) -> CompiledGraph<MusicStoreState> {
        let db: Arc<dyn SqlDatabase> = Arc::new(chinook().await);
        MusicStore::new(Arc::new(model.clone()), db)
            .with_compile_options(
                CompileOptions::new()
                    .with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
                    .with_store(store),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_format_user_memory() {
        let profile = UserProfile {
            customer_id: "1".into(),
            music_preferences: vec!["rock".into(), "jazz".into()],
        };
        assert_eq!(format_user_memory(&profile), "Music Preferences: rock, jazz");
        assert_eq!(format_user_memory(&UserProfile::default()), "");
    }

    #[tokio::test]
    async fn test_asks_for_identifier_then_answers() {
        let model = store_model();
        let store = Arc::new(InMemoryStore::new());
        let graph = music_store(&model, Arc::clone(&store)).await;
        let config = RunConfig::for_thread("customer");

        let outcome = graph
            .invoke_with_config(
                MusicStoreUpdate::default().messages(vec![Message::human("What was my most recent purchase?")]),
                &config,
            )
            .await
            .unwrap();
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.interrupts()[0].prompt(), Some(ASK_FOR_INPUT));
        assert_eq!(outcome.state().customer_id, None);

        let state = graph
            .resume(&config, Command::resume("my email is luisg@embraer.com.br"))
            .await
            .unwrap()
            .into_state();

        assert_eq!(state.customer_id.as_deref(), Some("1"));
        assert!(state
            .messages
            .iter()
            .any(|m| m.content.ends_with("verify your account with customer id 1.")));
        let answer = &state.messages.last().unwrap().content;
        assert!(answer.starts_with("Here is what I found:"));
        assert!(answer.contains("'InvoiceId': 121"));

        let saved = store
            .get(&profile_namespace(MEMORY_SCOPE, "1"), MEMORY_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.value, json!({"memory": {"customer_id": "1", "music_preferences": ["rock"]}}));
    }

    #[tokio::test]
    async fn test_known_customer_loads_memory() {
        let model = store_model();
        let store = Arc::new(InMemoryStore::new());
        store
            .put(
                &profile_namespace(MEMORY_SCOPE, "1"),
                MEMORY_KEY,
                json!({"memory": {"customer_id": "1", "music_preferences": ["jazz"]}}),
            )
            .await
            .unwrap();
        let graph = music_store(&model, Arc::clone(&store)).await;

        let outcome = graph
            .invoke_with_config(
                MusicStoreUpdate::default()
                    .customer_id(Some("1".to_string()))
                    .messages(vec![Message::human("Show my invoices")]),
                &RunConfig::for_thread("known"),
            )
            .await
            .unwrap();

        assert!(!outcome.is_interrupted());
        assert_eq!(outcome.state().loaded_memory.as_deref(), Some("Music Preferences: jazz"));
        assert!(!model.requests().iter().any(|r| schema_name(r) == Some("UserInput")));
        let memory_request = model
            .requests()
            .into_iter()
            .find(|r| schema_name(r) == Some("UserProfile"))
            .unwrap();
        assert!(memory_request.messages[0].content.contains("Music Preferences: jazz"));
    }

    #[tokio::test]
    async fn test_music_prompt_carries_preferences() {
        let ctx = ToolContext::new().with(LOADED_MEMORY, "Music Preferences: rock");
        assert!(music_prompt(&ctx).contains("Prior saved user preferences: Music Preferences: rock"));
        assert!(music_prompt(&ToolContext::new()).contains("Prior saved user preferences: None"));
    }
}
