//! Chat responses

use crate::llm::tools::ToolCall;
use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl UsageMetadata {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A complete model answer
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Assistant message, possibly carrying tool calls
    pub message: Message,
    pub usage: Option<UsageMetadata>,
    /// Provider's finish reason, e.g. `stop` or `tool_calls`
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
            finish_reason: None,
        }
    }

    pub fn with_usage(mut self, usage: UsageMetadata) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn text(&self) -> &str {
        &self.message.content
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.message.tool_calls
    }
}

/// One increment of a streamed answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    /// Text appended by this chunk
    pub delta: String,
    /// Complete tool calls; providers deliver them with the last chunk
    pub tool_calls: Vec<ToolCall>,
    /// Set on the last chunk
    pub usage: Option<UsageMetadata>,
}

impl ChatChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Default::default()
        }
    }
}
