//! Tools the agents hand to their models
//!
//! A [`Tool`] is a named async function with a JSON-schema signature. Its
//! [`ToolDefinition`] goes into the chat request; when the model answers
//! with a [`ToolCall`] the [`ToolRegistry`] looks the tool up, checks the
//! arguments against the schema and runs it. Tools always answer with
//! text, which becomes the content of a tool message.
//!
//! Values a tool needs but the model must not choose (the verified
//! customer id of the music store, for example) travel in a
//! [`ToolContext`] built from graph state, never in the arguments.
//!
//! ```rust,ignore
//! let registry = ToolRegistry::new()
//!     .with(FnTool::new("check_calendar_availability", "Check availability for a day", schema, |args| {
//!         Ok(format!("Available times on {}: 9:00 AM, 2:00 PM, 4:00 PM", args["day"].as_str().unwrap_or("")))
//!     }));
//! let observation = execute_tool_safely(&registry, &call, &ToolContext::new()).await;
//! ```

pub mod validation;

use crate::error::{AgentError, Result};
use agentgraph_core::llm::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub use validation::{integer_param, object_schema, string_param, validate_arguments};

/// Values injected into tool calls from graph state
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    values: Map<String, Value>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like [`get`](Self::get), failing when the value is absent
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)
            .ok_or_else(|| AgentError::InvalidInput(format!("missing context value '{}'", key)))
    }

    /// The values as a map, for handing on to a nested agent
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl From<HashMap<String, Value>> for ToolContext {
    fn from(values: HashMap<String, Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(self.parameters())
    }
}

/// Tools by name, in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool of the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions for a chat request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate the call's arguments and run the tool
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;
        validate_arguments(&tool.parameters(), &call.arguments)?;
        tracing::debug!(tool = %call.name, call_id = %call.id, "executing tool");
        tool.execute(call.arguments.clone(), ctx).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

impl FromIterator<Arc<dyn Tool>> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Tool>>>(iter: I) -> Self {
        let mut registry = Self::new();
        for tool in iter {
            registry.register(tool);
        }
        registry
    }
}

impl Extend<Arc<dyn Tool>> for ToolRegistry {
    fn extend<I: IntoIterator<Item = Arc<dyn Tool>>>(&mut self, iter: I) {
        for tool in iter {
            self.register(tool);
        }
    }
}

/// Run a tool call, turning any failure into an error observation
///
/// Every error becomes an observation, interrupts included. Tools that
/// interrupt should go through [`ToolNode`](crate::ToolNode) or
/// [`ToolRegistry::execute`].
pub async fn execute_tool_safely(registry: &ToolRegistry, call: &ToolCall, ctx: &ToolContext) -> String {
    match registry.execute(call, ctx).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "tool call failed");
            format!("Error executing tool: {}", e)
        }
    }
}

type ToolFn = dyn Fn(&Value) -> Result<String> + Send + Sync;

/// A tool backed by a synchronous closure
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    func: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, parameters: Value, func: F) -> Self
    where
        F: Fn(&Value) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        (self.func)(&args)
    }
}

/// Read a string argument
pub(crate) fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidInput(format!("missing required argument '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> FnTool {
        FnTool::new(
            "echo",
            "Repeat the text",
            object_schema([("text", string_param("Text to repeat"))]),
            |args| Ok(str_arg(args, "text")?.to_string()),
        )
    }

    struct Whoami;

    #[async_trait]
    impl Tool for Whoami {
        fn name(&self) -> &str {
            "whoami"
        }

        fn description(&self) -> &str {
            "Report the verified customer"
        }

        async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<String> {
            let id: i64 = ctx.require("customer_id")?;
            Ok(format!("customer {}", id))
        }
    }

    #[tokio::test]
    async fn test_registry_executes_by_name() {
        let registry = ToolRegistry::new().with(echo()).with(Whoami);
        assert_eq!(registry.names(), vec!["echo", "whoami"]);
        assert_eq!(registry.definitions()[0].name, "echo");

        let call = ToolCall::new("1", "echo", json!({"text": "hi"}));
        assert_eq!(registry.execute(&call, &ToolContext::new()).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_context_is_injected() {
        let registry = ToolRegistry::new().with(Whoami);
        let call = ToolCall::new("1", "whoami", json!({}));

        let ctx = ToolContext::new().with("customer_id", 5);
        assert_eq!(registry.execute(&call, &ctx).await.unwrap(), "customer 5");
        assert!(registry.execute(&call, &ToolContext::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_safe_execution_reports_errors() {
        let registry = ToolRegistry::new().with(echo());
        let ctx = ToolContext::new();

        let unknown = ToolCall::new("1", "nope", json!({}));
        assert_eq!(
            execute_tool_safely(&registry, &unknown, &ctx).await,
            "Error executing tool: Unknown tool: nope"
        );

        let invalid = ToolCall::new("2", "echo", json!({}));
        let observation = execute_tool_safely(&registry, &invalid, &ctx).await;
        assert!(observation.starts_with("Error executing tool:"));
        assert!(observation.contains("'text'"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new().with(echo());
        registry.register(Arc::new(FnTool::new("echo", "v2", json!({}), |_| Ok("v2".into()))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().description(), "v2");

        registry.extend(ToolRegistry::new().with(Whoami).iter().cloned());
        assert_eq!(registry.names(), vec!["echo", "whoami"]);
    }
}
