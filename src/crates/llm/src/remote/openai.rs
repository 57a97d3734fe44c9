//! OpenAI client implementation.
//!
//! Speaks the chat completions protocol, so the same client serves OpenAI
//! and compatible endpoints (Deepseek, OpenRouter, vLLM) through
//! [`RemoteLlmConfig::base_url`].
//!
//! Supported request options:
//! - tools and `tool_choice`
//! - `response_format` (`json_object` or `json_schema`)
//! - streaming with server-sent events, tool call fragments reassembled
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::remote::OpenAiClient;
//! use agentgraph_core::llm::{ChatModel, ChatRequest};
//! use agentgraph_core::Message;
//!
//! let client = OpenAiClient::from_env("gpt-4o-mini")?;
//! let request = ChatRequest::new(vec![Message::human("Hello!")]);
//! let response = client.chat(request).await?;
//! ```

use crate::config::{http_client, RemoteLlmConfig};
use crate::error::{LlmError, Result};
use agentgraph_core::error::Result as GraphResult;
use agentgraph_core::llm::{
    ChatChunk, ChatModel, ChatRequest, ChatResponse, ChatStream, ResponseFormat, ToolCall,
    ToolChoice, ToolDefinition, UsageMetadata,
};
use agentgraph_core::{retry_async, GraphError, Message, MessageRole};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default OpenAI endpoint, overridden by `OPENAI_BASE_URL`.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAiClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiClient {
    /// Create a new OpenAI client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    /// Client for `model` using `OPENAI_API_KEY` and, if set,
    /// `OPENAI_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(RemoteLlmConfig::from_env("OPENAI_API_KEY", base_url, model)?)
    }

    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    /// Convert a conversation message to OpenAI message format.
    fn convert_message(msg: &Message) -> OpenAiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::Human => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
            msg.tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });
        // an assistant turn that only calls tools has null content
        let content = if tool_calls.is_some() && msg.content.is_empty() {
            None
        } else {
            Some(msg.content.clone())
        };

        OpenAiMessage {
            role: role.to_string(),
            content,
            name: msg.name.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tool(tool: &ToolDefinition) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        })
    }

    fn convert_tool_choice(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Required => json!("required"),
            ToolChoice::None => json!("none"),
            ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        }
    }

    fn convert_response_format(format: &ResponseFormat) -> Value {
        match format {
            ResponseFormat::JsonObject => json!({"type": "json_object"}),
            ResponseFormat::JsonSchema { name, schema } => json!({
                "type": "json_schema",
                "json_schema": {"name": name, "schema": schema},
            }),
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.config.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens,
            stop: (!request.stop.is_empty()).then(|| request.stop.clone()),
            tools: (!request.tools.is_empty())
                .then(|| request.tools.iter().map(Self::convert_tool).collect()),
            tool_choice: request
                .tool_choice
                .as_ref()
                .filter(|_| !request.tools.is_empty())
                .map(Self::convert_tool_choice),
            response_format: request.response_format.as_ref().map(Self::convert_response_format),
            stream,
            stream_options: stream.then(|| json!({"include_usage": true})),
        }
    }

    /// Convert OpenAI response to ChatResponse.
    fn convert_response(openai_resp: OpenAiResponse) -> Result<ChatResponse> {
        let choice = openai_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall::new(call.id, call.function.name, parse_arguments(call.function.arguments)))
            .collect();

        let message = Message::ai(choice.message.content.unwrap_or_default()).with_tool_calls(tool_calls);

        Ok(ChatResponse {
            message,
            usage: openai_resp
                .usage
                .map(|u| UsageMetadata::new(u.prompt_tokens, u.completion_tokens)),
            finish_reason: choice.finish_reason,
        })
    }

    async fn send(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let url = &url;
        let client = &self.client;
        let config = &self.config;

        retry_async(&config.retry_policy(), LlmError::is_retryable, |_| async move {
            let mut req = client.post(url).bearer_auth(&config.api_key).json(body);
            if let Some(org) = &config.organization {
                req = req.header("OpenAI-Organization", org);
            }

            let response = req.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(LlmError::from_status("OpenAI", status, error_text));
            }
            Ok(response)
        })
        .await
    }
}

/// Arguments arrive as a JSON string; keep the raw text if it is not JSON.
fn parse_arguments(arguments: String) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(&arguments).unwrap_or(Value::String(arguments))
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> GraphResult<ChatResponse> {
        let body = self.build_request(&request, false);
        tracing::debug!(model = %self.config.model, messages = body.messages.len(), "openai chat request");

        let response = self.send(&body).await?;
        let openai_resp: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(Self::convert_response(openai_resp)?)
    }

    async fn stream(&self, request: ChatRequest) -> GraphResult<ChatStream> {
        let body = self.build_request(&request, true);
        let response = self.send(&body).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            let mut state = StreamState::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| GraphError::from(LlmError::from(e)))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    match sse_data(&line) {
                        Some("[DONE]") => {
                            yield std::mem::take(&mut state).finish();
                            return;
                        }
                        Some(data) => {
                            let event: OpenAiStreamChunk = serde_json::from_str(data)
                                .map_err(|e| GraphError::from(LlmError::InvalidResponse(e.to_string())))?;
                            if let Some(delta) = state.push(event) {
                                yield delta;
                            }
                        }
                        None => {}
                    }
                }
            }
            yield state.finish();
        };

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}

/// Payload of a server-sent event `data:` line.
fn sse_data(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}

/// Reassembles tool calls and usage across stream chunks.
#[derive(Debug, Default)]
struct StreamState {
    calls: Vec<(String, String, String)>,
    usage: Option<UsageMetadata>,
}

impl StreamState {
    /// Record one chunk; returns the text delta to forward, if any.
    fn push(&mut self, chunk: OpenAiStreamChunk) -> Option<ChatChunk> {
        if let Some(u) = chunk.usage {
            self.usage = Some(UsageMetadata::new(u.prompt_tokens, u.completion_tokens));
        }
        let choice = chunk.choices.into_iter().next()?;

        for fragment in choice.delta.tool_calls {
            if self.calls.len() <= fragment.index {
                self.calls.resize(fragment.index + 1, Default::default());
            }
            let slot = &mut self.calls[fragment.index];
            if let Some(id) = fragment.id {
                slot.0 = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    slot.1.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    slot.2.push_str(&arguments);
                }
            }
        }

        choice
            .delta
            .content
            .filter(|text| !text.is_empty())
            .map(ChatChunk::text)
    }

    /// Final chunk carrying complete tool calls and usage.
    fn finish(self) -> ChatChunk {
        ChatChunk {
            delta: String::new(),
            tool_calls: self
                .calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCall::new(id, name, parse_arguments(arguments)))
                .collect(),
            usage: self.usage,
        }
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
