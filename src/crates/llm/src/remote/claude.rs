//! Anthropic Claude client implementation.
//!
//! The messages API differs from chat completions in three ways this client
//! hides:
//!
//! | Concept | Chat completions | Anthropic |
//! |---------|------------------|-----------|
//! | system prompt | a message | top-level `system` field |
//! | tool results | `tool` role messages | `tool_result` blocks in a user turn |
//! | structured output | `response_format` | a forced tool whose input is the answer |
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::remote::ClaudeClient;
//! use agentgraph_core::llm::{ChatModel, ChatRequest};
//! use agentgraph_core::Message;
//!
//! let client = ClaudeClient::from_env("claude-3-5-sonnet-latest")?;
//! let request = ChatRequest::new(vec![Message::human("Hello!")]);
//! let response = client.chat(request).await?;
//! ```

use crate::config::{http_client, RemoteLlmConfig};
use crate::error::{LlmError, Result};
use agentgraph_core::error::Result as GraphResult;
use agentgraph_core::llm::{
    ChatModel, ChatRequest, ChatResponse, ResponseFormat, ToolCall, ToolChoice, UsageMetadata,
};
use agentgraph_core::{retry_async, Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default Anthropic endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// The messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const JSON_OBJECT_INSTRUCTION: &str = "Respond with a single JSON object and nothing else.";

/// Anthropic Claude API client.
#[derive(Clone)]
pub struct ClaudeClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl ClaudeClient {
    /// Create a new Claude client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    /// Client for `model` using `ANTHROPIC_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        Self::new(RemoteLlmConfig::from_env("ANTHROPIC_API_KEY", DEFAULT_BASE_URL, model)?)
    }

    /// Split system text from the conversation and encode turns as content
    /// blocks. Consecutive tool results share one user turn.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<ClaudeMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut claude_messages: Vec<ClaudeMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                MessageRole::System => system_parts.push(&msg.content),
                MessageRole::Human => claude_messages.push(ClaudeMessage {
                    role: "user".to_string(),
                    content: vec![json!({"type": "text", "text": msg.content})],
                }),
                MessageRole::Assistant => {
                    let mut content = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    claude_messages.push(ClaudeMessage {
                        role: "assistant".to_string(),
                        content,
                    });
                }
                MessageRole::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content,
                    });
                    match claude_messages.last_mut() {
                        Some(last) if last.is_tool_results() => last.content.push(block),
                        _ => claude_messages.push(ClaudeMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, claude_messages)
    }

    fn build_request(&self, request: &ChatRequest) -> ClaudeRequest {
        let (mut system, messages) = Self::convert_messages(&request.messages);

        let mut tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect();

        let mut tool_choice = request
            .tool_choice
            .as_ref()
            .filter(|_| !tools.is_empty())
            .map(|choice| match choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::None => json!({"type": "none"}),
                ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
            });

        match &request.response_format {
            Some(ResponseFormat::JsonSchema { name, schema }) => {
                tools.push(json!({
                    "name": name,
                    "description": "Respond with structured output matching this schema.",
                    "input_schema": schema,
                }));
                tool_choice = Some(json!({"type": "tool", "name": name}));
            }
            Some(ResponseFormat::JsonObject) => {
                system = Some(match system {
                    Some(existing) => format!("{}\n\n{}", existing, JSON_OBJECT_INSTRUCTION),
                    None => JSON_OBJECT_INSTRUCTION.to_string(),
                });
            }
            None => {}
        }

        ClaudeRequest {
            model: self.config.model.clone(),
            messages,
            system,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature.or(self.config.temperature),
            stop_sequences: (!request.stop.is_empty()).then(|| request.stop.clone()),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
        }
    }

    /// Convert Claude response to ChatResponse.
    fn convert_response(claude_resp: ClaudeResponse) -> ChatResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in claude_resp.content {
            match block {
                ClaudeContent::Text { text: part } => text.push_str(&part),
                ClaudeContent::ToolUse { id, name, input } => tool_calls.push(ToolCall::new(id, name, input)),
                ClaudeContent::Other => {}
            }
        }

        ChatResponse {
            message: Message::ai(text)
                .with_id(claude_resp.id)
                .with_tool_calls(tool_calls),
            usage: Some(UsageMetadata::new(
                claude_resp.usage.input_tokens,
                claude_resp.usage.output_tokens,
            )),
            finish_reason: claude_resp.stop_reason,
        }
    }
}

#[async_trait]
impl ChatModel for ClaudeClient {
    async fn chat(&self, request: ChatRequest) -> GraphResult<ChatResponse> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let body = self.build_request(&request);
        tracing::debug!(model = %self.config.model, messages = body.messages.len(), "claude chat request");

        let (url, body, client, config) = (&url, &body, &self.client, &self.config);
        let response = retry_async(&config.retry_policy(), LlmError::is_retryable, |_| async move {
            let response = client
                .post(url)
                .header("x-api-key", &config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(LlmError::from_status("Claude", status, error_text));
            }
            Ok(response)
        })
        .await?;

        let claude_resp: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(Self::convert_response(claude_resp))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}

// Claude API types
#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: String,
    content: Vec<Value>,
}

impl ClaudeMessage {
    fn is_tool_results(&self) -> bool {
        self.role == "user"
            && !self.content.is_empty()
            && self.content.iter().all(|block| block["type"] == "tool_result")
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    id: String,
    content: Vec<ClaudeContent>,
    stop_reason: Option<String>,
    usage: ClaudeUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::llm::ToolDefinition;

    fn client() -> ClaudeClient {
        ClaudeClient::new(RemoteLlmConfig::new("test-key", DEFAULT_BASE_URL, "claude-3-5-haiku-latest")).unwrap()
    }

    #[test]
    fn test_system_messages_are_lifted() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::system("Be brief"),
            Message::human("Hello"),
        ];
        let (system, claude_msgs) = ClaudeClient::convert_messages(&messages);

        assert_eq!(system.as_deref(), Some("You are helpful\n\nBe brief"));
        assert_eq!(claude_msgs.len(), 1);
        assert_eq!(claude_msgs[0].role, "user");
        assert_eq!(claude_msgs[0].content[0]["text"], "Hello");
    }

    #[test]
    fn test_tool_round_trip_encoding() {
        let messages = vec![
            Message::human("Weather in SF and NYC?"),
            Message::ai("").with_tool_calls(vec![
                ToolCall::new("toolu_1", "weather", json!({"city": "SF"})),
                ToolCall::new("toolu_2", "weather", json!({"city": "NYC"})),
            ]),
            Message::tool("sunny", "toolu_1"),
            Message::tool("rainy", "toolu_2"),
        ];
        let (_, claude_msgs) = ClaudeClient::convert_messages(&messages);

        assert_eq!(claude_msgs.len(), 3);
        assert_eq!(claude_msgs[1].content.len(), 2);
        assert_eq!(claude_msgs[1].content[0]["type"], "tool_use");
        assert_eq!(claude_msgs[1].content[1]["input"]["city"], "NYC");
        assert_eq!(claude_msgs[2].role, "user");
        assert_eq!(claude_msgs[2].content.len(), 2);
        assert_eq!(claude_msgs[2].content[1]["tool_use_id"], "toolu_2");
    }

    #[test]
    fn test_structured_output_becomes_forced_tool() {
        let request = ChatRequest::new(vec![Message::human("Route this email")]).with_response_format(
            ResponseFormat::JsonSchema {
                name: "Router".into(),
                schema: json!({"type": "object", "properties": {"classification": {"type": "string"}}}),
            },
        );
        let body = serde_json::to_value(client().build_request(&request)).unwrap();

        assert_eq!(body["tools"][0]["name"], "Router");
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "Router"}));
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tool_choice_mapping() {
        let request = ChatRequest::new(vec![Message::human("hi")])
            .with_tools(vec![ToolDefinition::new("search", "Search the web")])
            .with_tool_choice(ToolChoice::Required);
        let body = serde_json::to_value(client().build_request(&request)).unwrap();

        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"], json!({"type": "any"}));
    }

    #[test]
    fn test_response_conversion() {
        let raw = json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-haiku-latest",
            "content": [
                {"type": "text", "text": "Looking it up."},
                {"type": "tool_use", "id": "toolu_1", "name": "Router", "input": {"classification": "respond"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 8}
        });
        let response = ClaudeClient::convert_response(serde_json::from_value(raw).unwrap());

        assert_eq!(response.text(), "Looking it up.");
        assert_eq!(response.message.id.as_deref(), Some("msg_01"));
        assert_eq!(response.tool_calls()[0].arguments["classification"], "respond");
        assert_eq!(response.usage, Some(UsageMetadata::new(12, 8)));
        assert_eq!(response.finish_reason.as_deref(), Some("tool_use"));
    }
}
