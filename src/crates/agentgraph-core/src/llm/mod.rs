//! Chat model abstraction
//!
//! The engine talks to language models only through the [`ChatModel`]
//! trait. Concrete provider clients (OpenAI-compatible, Anthropic, Ollama)
//! live in the `llm` crate of this workspace; this module holds what nodes
//! need to *use* a model:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`ChatRequest`] | messages plus options: tools, tool choice, response format |
//! | [`ChatResponse`] | assistant message, usage, finish reason |
//! | [`ToolDefinition`] / [`ToolCall`] | function calling |
//! | [`StructuredOutput`] | typed answers parsed from JSON, with bounded retries |
//! | [`ScriptedChatModel`] | deterministic model for tests |
//!
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct Route { step: String }
//!
//! let router = with_structured_output::<Route>(model.clone(), "Route", route_schema());
//! let route = router.invoke(vec![Message::system(ROUTER_PROMPT), Message::human(email)]).await?;
//! ```

pub mod config;
pub mod fake;
pub mod response;
pub mod structured;
pub mod tools;
pub mod traits;

pub use config::{ChatRequest, ResponseFormat, ToolChoice};
pub use fake::ScriptedChatModel;
pub use response::{ChatChunk, ChatResponse, UsageMetadata};
pub use structured::{with_structured_output, StructuredOutput};
pub use tools::{ToolCall, ToolDefinition};
pub use traits::{ChatModel, ChatStream};
