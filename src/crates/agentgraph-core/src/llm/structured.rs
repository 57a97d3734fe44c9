//! Typed model output
//!
//! [`with_structured_output`] wraps a model so that every call returns a
//! value of a caller-chosen type instead of free text. The request carries
//! a [`ResponseFormat::JsonSchema`]; the answer is taken from a tool call
//! of the same name when the provider answers that way, otherwise from the
//! message text (code fences and surrounding prose are tolerated).
//!
//! Answers that fail to parse are retried under a [`RetryPolicy`] (three
//! immediate attempts by default). Exhaustion returns
//! [`GraphError::Model`]; errors of the model call itself are not retried
//! here.

use crate::error::{GraphError, Result};
use crate::llm::config::{ChatRequest, ResponseFormat};
use crate::llm::traits::ChatModel;
use crate::messages::Message;
use crate::retry::{retry_async, RetryPolicy};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Attempts used when no policy is given
pub const DEFAULT_PARSE_ATTEMPTS: usize = 3;

/// Model wrapper returning `T`
pub struct StructuredOutput<T> {
    model: Arc<dyn ChatModel>,
    name: String,
    schema: Value,
    policy: RetryPolicy,
    temperature: Option<f32>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Clone for StructuredOutput<T> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            name: self.name.clone(),
            schema: self.schema.clone(),
            policy: self.policy.clone(),
            temperature: self.temperature,
            _output: PhantomData,
        }
    }
}

/// Bind `model` to the JSON schema `schema`, named `name`
pub fn with_structured_output<T: DeserializeOwned>(
    model: Arc<dyn ChatModel>,
    name: impl Into<String>,
    schema: Value,
) -> StructuredOutput<T> {
    StructuredOutput {
        model,
        name: name.into(),
        schema,
        policy: RetryPolicy::immediate(DEFAULT_PARSE_ATTEMPTS),
        temperature: None,
        _output: PhantomData,
    }
}

enum AttemptError {
    Model(GraphError),
    Parse(String),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Model(err) => write!(f, "{}", err),
            AttemptError::Parse(reason) => write!(f, "unparseable answer: {}", reason),
        }
    }
}

impl<T: DeserializeOwned> StructuredOutput<T> {
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the model and decode its answer
    pub async fn invoke(&self, messages: Vec<Message>) -> Result<T> {
        let outcome = retry_async(
            &self.policy,
            |err: &AttemptError| matches!(err, AttemptError::Parse(_)),
            |_| self.attempt(messages.clone()),
        )
        .await;

        outcome.map_err(|err| match err {
            AttemptError::Model(err) => err,
            AttemptError::Parse(reason) => GraphError::Model(format!(
                "structured output '{}' failed after {} attempts: {}",
                self.name, self.policy.max_attempts, reason
            )),
        })
    }

    async fn attempt(&self, messages: Vec<Message>) -> std::result::Result<T, AttemptError> {
        let mut request = ChatRequest::new(messages).with_response_format(ResponseFormat::JsonSchema {
            name: self.name.clone(),
            schema: self.schema.clone(),
        });
        request.temperature = self.temperature;

        let response = self.model.chat(request).await.map_err(AttemptError::Model)?;

        let value = match response.tool_calls().iter().find(|call| call.name == self.name) {
            Some(call) => call.arguments.clone(),
            None => extract_json(response.text()).ok_or_else(|| {
                AttemptError::Parse(format!("no JSON object in {:?}", truncate(response.text())))
            })?,
        };
        serde_json::from_value(value).map_err(|e| AttemptError::Parse(e.to_string()))
    }
}

/// Find the JSON object in a model answer
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn truncate(text: &str) -> String {
    text.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::ScriptedChatModel;
    use crate::llm::tools::ToolCall;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Grade {
        binary_score: String,
    }

    fn schema() -> Value {
        json!({"type": "object", "properties": {"binary_score": {"type": "string"}}})
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("```json\n{\"a\": 1}\n```"),
            Some(json!({"a": 1}))
        );
        assert_eq!(extract_json("Sure! {\"a\": 1} Hope that helps"), Some(json!({"a": 1})));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} {"), None);
    }

    #[tokio::test]
    async fn test_parses_text_answer() {
        let model = ScriptedChatModel::new([Message::ai(r#"{"binary_score": "yes"}"#)]);
        let grader = with_structured_output::<Grade>(Arc::new(model.clone()), "grade", schema());
        let grade = grader.invoke(vec![Message::human("?")]).await.unwrap();
        assert_eq!(grade.binary_score, "yes");

        let request = &model.requests()[0];
        assert!(matches!(
            request.response_format,
            Some(ResponseFormat::JsonSchema { ref name, .. }) if name == "grade"
        ));
    }

    #[tokio::test]
    async fn test_prefers_matching_tool_call() {
        let reply = Message::ai("").with_tool_calls(vec![ToolCall::new(
            "call_1",
            "grade",
            json!({"binary_score": "no"}),
        )]);
        let model = ScriptedChatModel::new([reply]);
        let grader = with_structured_output::<Grade>(Arc::new(model), "grade", schema());
        assert_eq!(grader.invoke(vec![]).await.unwrap().binary_score, "no");
    }

    #[tokio::test]
    async fn test_retries_unparseable_answers() {
        let model = ScriptedChatModel::new([
            Message::ai("not json"),
            Message::ai(r#"{"wrong": 1}"#),
            Message::ai(r#"{"binary_score": "yes"}"#),
        ]);
        let grader = with_structured_output::<Grade>(Arc::new(model.clone()), "grade", schema());
        assert_eq!(grader.invoke(vec![]).await.unwrap().binary_score, "yes");
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_model_error() {
        let model = ScriptedChatModel::from_fn(|_| Ok(Message::ai("never json")));
        let grader = with_structured_output::<Grade>(Arc::new(model.clone()), "grade", schema());
        let err = grader.invoke(vec![]).await.unwrap_err();
        assert!(matches!(err, GraphError::Model(ref m) if m.contains("after 3 attempts")));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_model_errors_are_not_retried() {
        let model = ScriptedChatModel::from_fn(|_| Err(GraphError::Model("rate limited".into())));
        let grader = with_structured_output::<Grade>(Arc::new(model.clone()), "grade", schema());
        let err = grader.invoke(vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "Model error: rate limited");
        assert_eq!(model.calls(), 1);
    }
}
