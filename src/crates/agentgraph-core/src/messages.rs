//! Conversation messages
//!
//! [`Message`] is the unit of conversation history shared by nodes, chat
//! models and tools. Every message carries an id; [`add_messages`] uses it
//! to decide whether an incoming message extends the history or replaces an
//! earlier one (for example a re-checked SQL query that keeps the id of the
//! draft it corrects).

use crate::llm::ToolCall;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions for the model
    System,
    /// End-user input
    Human,
    /// Model output
    Assistant,
    /// Result of a tool call
    Tool,
}

impl MessageRole {
    /// Prefix used when rendering a transcript
    pub fn transcript_prefix(&self) -> &'static str {
        match self {
            MessageRole::System => "System",
            MessageRole::Human => "Human",
            MessageRole::Assistant => "AI",
            MessageRole::Tool => "Tool",
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub role: MessageRole,

    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool invocations requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call this tool message answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role,
            content: content.into(),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Tool result answering `tool_call_id`
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::new(MessageRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_human(&self) -> bool {
        self.role == MessageRole::Human
    }

    pub fn is_ai(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    pub fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
    }
}

/// Merge two message lists
///
/// Messages from `right` whose id already appears in `left` replace the
/// earlier message at its position; all others are appended in order.
/// Messages without an id are given one.
///
/// ```rust
/// use agentgraph_core::messages::{add_messages, Message};
///
/// let left = vec![Message::human("hi").with_id("1"), Message::ai("draft").with_id("2")];
/// let right = vec![Message::ai("final").with_id("2"), Message::human("thanks")];
///
/// let merged = add_messages(left, right);
/// assert_eq!(merged.len(), 3);
/// assert_eq!(merged[1].content, "final");
/// ```
pub fn add_messages(left: Vec<Message>, right: Vec<Message>) -> Vec<Message> {
    let mut merged = left;
    for message in merged.iter_mut() {
        message.ensure_id();
    }

    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.id.clone().map(|id| (id, i)))
        .collect();

    for mut message in right {
        message.ensure_id();
        let existing = message.id.as_ref().and_then(|id| index.get(id).copied());
        match existing {
            Some(position) => merged[position] = message,
            None => {
                if let Some(id) = message.id.clone() {
                    index.insert(id, merged.len());
                }
                merged.push(message);
            }
        }
    }

    merged
}

/// Last message of a history
pub fn last_message(messages: &[Message]) -> Option<&Message> {
    messages.last()
}

/// Content of the most recent human message
pub fn last_human_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_human())
        .map(|m| m.content.as_str())
}

/// Render a history as `Role: content` lines
pub fn get_buffer_string(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.transcript_prefix(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
