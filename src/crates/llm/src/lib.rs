//! Chat model clients for agentgraph.
//!
//! This crate provides concrete implementations of the `ChatModel` trait
//! from `agentgraph-core` for local and remote providers.
//!
//! # Local Providers
//!
//! - **Ollama** - local LLM runner; `OLLAMA_BASE_URL` overrides the endpoint
//!
//! # Remote Providers
//!
//! - **OpenAI** - and any OpenAI-compatible server (Deepseek, OpenRouter)
//! - **Claude** - Anthropic's messages API
//!
//! Every client retries transient failures (connection errors, 429, 5xx)
//! with exponential backoff before reporting an error. Errors convert into
//! [`GraphError::Model`](agentgraph_core::GraphError::Model) so nodes can
//! use `?` on them.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use llm::{init_chat_model, InitOptions};
//! use agentgraph_core::llm::ChatRequest;
//! use agentgraph_core::Message;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = InitOptions { temperature: Some(0.0), ..Default::default() };
//!     let model = init_chat_model("openai:gpt-4o-mini", &options)?;
//!
//!     let response = model
//!         .chat(ChatRequest::new(vec![Message::human("What is Rust?")]))
//!         .await?;
//!     println!("Response: {}", response.text());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod init;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

// Re-export commonly used types
pub use config::{LocalLlmConfig, RemoteLlmConfig};
pub use error::{LlmError, Result};
pub use init::{init_chat_model, InitOptions, ModelSpec, Provider};

// Re-export agentgraph-core types for convenience
pub use agentgraph_core::llm::{
    ChatChunk, ChatModel, ChatRequest, ChatResponse, ChatStream, ResponseFormat, ToolCall,
    ToolChoice, ToolDefinition, UsageMetadata,
};
pub use agentgraph_core::Message;
