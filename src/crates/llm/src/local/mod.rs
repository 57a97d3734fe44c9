//! Local LLM provider implementations.
//!
//! Providers running on localhost or the local network. No API key is
//! needed.
//!
//! # Providers
//!
//! - **Ollama** - local LLM runner with wide model support

pub mod ollama;

pub use ollama::OllamaClient;
