//! Remote LLM provider implementations.
//!
//! These providers require API keys, read from the environment.
//!
//! # Providers
//!
//! - **OpenAI** - OpenAI chat completions, and any server speaking the same
//!   protocol (Deepseek, OpenRouter, vLLM)
//! - **Claude** - Anthropic's messages API

pub mod claude;
pub mod openai;

pub use claude::ClaudeClient;
pub use openai::OpenAiClient;
