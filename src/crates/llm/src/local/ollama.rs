//! Ollama client implementation.
//!
//! Provides integration with Ollama, a popular local LLM runner. Tool
//! calling and JSON-schema constrained output need a model that supports
//! them (Llama 3.1+, Qwen 2.5, Mistral Nemo).
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::local::OllamaClient;
//! use llm::config::LocalLlmConfig;
//! use agentgraph_core::llm::{ChatModel, ChatRequest};
//! use agentgraph_core::Message;
//!
//! let client = OllamaClient::new(LocalLlmConfig::ollama_from_env("llama3.1"))?;
//! let request = ChatRequest::new(vec![Message::human("Hello!")]);
//! let response = client.chat(request).await?;
//! ```

use crate::config::{http_client, LocalLlmConfig};
use crate::error::{LlmError, Result};
use agentgraph_core::error::Result as GraphResult;
use agentgraph_core::llm::{ChatModel, ChatRequest, ChatResponse, ResponseFormat, ToolCall, UsageMetadata};
use agentgraph_core::{retry_async, Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Ollama client for local LLM inference.
#[derive(Clone)]
pub struct OllamaClient {
    config: LocalLlmConfig,
    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client with the given configuration.
    pub fn new(config: LocalLlmConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }

    /// Check if Ollama server is running.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Convert a conversation message to Ollama message format.
    fn convert_message(msg: &Message) -> OllamaMessage {
        OllamaMessage {
            role: match msg.role {
                MessageRole::System => "system",
                MessageRole::Human => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            }
            .to_string(),
            content: msg.content.clone(),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| OllamaToolCall {
                    function: OllamaFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        }
    }

    fn build_request(&self, request: &ChatRequest) -> OllamaRequest {
        let mut options = Map::new();
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !request.stop.is_empty() {
            options.insert("stop".to_string(), json!(request.stop));
        }

        OllamaRequest {
            model: self.config.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            stream: false,
            tools: (!request.tools.is_empty()).then(|| {
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect()
            }),
            format: request.response_format.as_ref().map(|format| match format {
                ResponseFormat::JsonObject => json!("json"),
                ResponseFormat::JsonSchema { schema, .. } => schema.clone(),
            }),
            options: (!options.is_empty()).then_some(Value::Object(options)),
        }
    }

    /// Convert Ollama response to ChatResponse.
    fn convert_response(ollama_resp: OllamaResponse) -> ChatResponse {
        // Ollama does not assign call ids
        let tool_calls = ollama_resp
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, call)| ToolCall::new(format!("call_{}", i), call.function.name, call.function.arguments))
            .collect();

        let usage = match (ollama_resp.prompt_eval_count, ollama_resp.eval_count) {
            (None, None) => None,
            (input, output) => Some(UsageMetadata::new(input.unwrap_or(0), output.unwrap_or(0))),
        };

        ChatResponse {
            message: Message::ai(ollama_resp.message.content).with_tool_calls(tool_calls),
            usage,
            finish_reason: ollama_resp.done_reason,
        }
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> GraphResult<ChatResponse> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let body = self.build_request(&request);
        tracing::debug!(model = %self.config.model, messages = body.messages.len(), "ollama chat request");

        let (url, body, client) = (&url, &body, &self.client);
        let response = retry_async(&self.config.retry_policy(), LlmError::is_retryable, |_| async move {
            let response = client.post(url).json(body).send().await.map_err(|e| {
                if e.is_connect() {
                    LlmError::ServiceUnavailable(format!("Ollama is not reachable at {}: {}", url, e))
                } else {
                    LlmError::HttpError(e)
                }
            })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(LlmError::from_status("Ollama", status, error_text));
            }
            Ok(response)
        })
        .await?;

        let ollama_resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(Self::convert_response(ollama_resp))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgraph_core::llm::ToolDefinition;

    fn client() -> OllamaClient {
        OllamaClient::new(LocalLlmConfig::new("http://localhost:11434", "llama3.1")).unwrap()
    }

    #[test]
    fn test_message_conversion() {
        let msg = OllamaClient::convert_message(&Message::human("Hello"));
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "Hello");

        let tool = OllamaClient::convert_message(&Message::tool("3 rows", "call_0"));
        assert_eq!(tool.role, "tool");
    }

    #[test]
    fn test_request_options_and_format() {
        let request = ChatRequest::new(vec![Message::human("Grade this")])
            .with_temperature(0.0)
            .with_max_tokens(256)
            .with_tools(vec![ToolDefinition::new("search", "Search")])
            .with_response_format(ResponseFormat::JsonSchema {
                name: "Grade".into(),
                schema: json!({"type": "object"}),
            });
        let body = serde_json::to_value(client().build_request(&request)).unwrap();

        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.0);
        assert_eq!(body["options"]["num_predict"], 256);
        assert_eq!(body["format"], json!({"type": "object"}));
        assert_eq!(body["tools"][0]["function"]["name"], "search");
    }

    #[test]
    fn test_no_options_when_unset() {
        let body = serde_json::to_value(client().build_request(&ChatRequest::new(vec![]))).unwrap();
        assert!(body.get("options").is_none());
        assert!(body.get("format").is_none());
    }

    #[test]
    fn test_response_conversion_assigns_call_ids() {
        let raw = json!({
            "model": "llama3.1",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "search", "arguments": {"query": "rust"}}},
                    {"function": {"name": "think_tool", "arguments": {"reflection": "ok"}}}
                ]
            },
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 26,
            "eval_count": 12
        });
        let response = OllamaClient::convert_response(serde_json::from_value(raw).unwrap());

        let ids: Vec<_> = response.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_0", "call_1"]);
        assert_eq!(response.tool_calls()[0].arguments["query"], "rust");
        assert_eq!(response.usage, Some(UsageMetadata::new(26, 12)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        let config = LocalLlmConfig::new("http://127.0.0.1:9", "llama3.1").with_max_retries(0);
        let client = OllamaClient::new(config).unwrap();
        assert!(!client.check_health().await);
    }
}
