//! ToolNode - runs the tool calls of the last AI message
//!
//! ```text
//!   messages: [.., ai{tool_calls: [search#1, think#2]}]
//!                      │
//!                      ▼  ToolNode::run   (calls run concurrently)
//!   returns:  [tool{#1, "..."}, tool{#2, "..."}]   (in call order)
//! ```
//!
//! Nodes own their state type, so [`ToolNode`] works on a message slice
//! and returns the tool messages for the caller to put in its update.
//!
//! By default failures become `"Error executing tool: .."` observations the
//! model can react to. With error handling switched off the first failure
//! fails the node instead.
//!
//! [`tools_condition`] is the router paired with it: `"tools"` when the
//! last message asks for tools, [`END`] otherwise.

use crate::error::Result;
use crate::tools::{Tool, ToolContext, ToolRegistry};
use agentgraph_core::messages::last_message;
use agentgraph_core::{Message, END};
use futures::future::join_all;
use std::sync::Arc;

/// Label returned by [`tools_condition`] when tools should run
pub const TOOLS: &str = "tools";

#[derive(Clone, Debug)]
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
    handle_tool_errors: bool,
}

impl ToolNode {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            handle_tool_errors: true,
        }
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        Self::new(tools.into_iter().collect())
    }

    pub fn with_error_handling(mut self, handle: bool) -> Self {
        self.handle_tool_errors = handle;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute every tool call of the last message
    ///
    /// Returns no messages when the last message is not an AI message with
    /// tool calls.
    pub async fn run(&self, messages: &[Message], ctx: &ToolContext) -> Result<Vec<Message>> {
        let calls = match last_message(messages) {
            Some(last) if last.is_ai() => last.tool_calls.clone(),
            _ => Vec::new(),
        };
        if calls.is_empty() {
            tracing::debug!("no tool calls to execute");
            return Ok(Vec::new());
        }

        let outputs = join_all(calls.iter().map(|call| self.registry.execute(call, ctx))).await;

        let mut results = Vec::with_capacity(calls.len());
        for (call, output) in calls.iter().zip(outputs) {
            let content = match output {
                Ok(content) => content,
                Err(e) if self.handle_tool_errors && !is_interrupt(&e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                    format!("Error executing tool: {}", e)
                }
                Err(e) => return Err(e),
            };
            results.push(Message::tool(content, call.id.clone()).with_name(call.name.clone()));
        }
        Ok(results)
    }
}

fn is_interrupt(err: &crate::AgentError) -> bool {
    matches!(
        err,
        crate::AgentError::Graph(agentgraph_core::GraphError::NodeInterrupt(_))
    )
}

/// `"tools"` if the last message has tool calls, [`END`] otherwise
pub fn tools_condition(messages: &[Message]) -> &'static str {
    match last_message(messages) {
        Some(last) if last.is_ai() && last.has_tool_calls() => TOOLS,
        _ => END,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{object_schema, string_param, FnTool};
    use agentgraph_core::llm::ToolCall;
    use serde_json::json;

    fn node() -> ToolNode {
        ToolNode::new(
            ToolRegistry::new()
                .with(FnTool::new(
                    "upper",
                    "Upper-case text",
                    object_schema([("text", string_param("text"))]),
                    |args| Ok(args["text"].as_str().unwrap_or_default().to_uppercase()),
                ))
                .with(FnTool::new("fail", "Always fails", json!({}), |_| {
                    Err(crate::AgentError::tool("fail", "boom"))
                })),
        )
    }

    fn ai_calling(calls: Vec<ToolCall>) -> Vec<Message> {
        vec![Message::human("go"), Message::ai("").with_tool_calls(calls)]
    }

    #[tokio::test]
    async fn test_runs_calls_in_order() {
        let messages = ai_calling(vec![
            ToolCall::new("a", "upper", json!({"text": "one"})),
            ToolCall::new("b", "upper", json!({"text": "two"})),
        ]);
        let results = node().run(&messages, &ToolContext::new()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "ONE");
        assert_eq!(results[0].tool_call_id.as_deref(), Some("a"));
        assert_eq!(results[1].name.as_deref(), Some("upper"));
        assert_eq!(results[1].content, "TWO");
    }

    #[tokio::test]
    async fn test_errors_become_observations() {
        let messages = ai_calling(vec![ToolCall::new("a", "fail", json!({}))]);
        let results = node().run(&messages, &ToolContext::new()).await.unwrap();
        assert_eq!(results[0].content, "Error executing tool: Tool 'fail' failed: boom");

        let strict = node().with_error_handling(false);
        assert!(strict.run(&messages, &ToolContext::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_nothing_to_run() {
        let messages = vec![Message::ai("done")];
        assert!(node().run(&messages, &ToolContext::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_tools_condition() {
        let calls = ai_calling(vec![ToolCall::new("a", "upper", json!({"text": "x"}))]);
        assert_eq!(tools_condition(&calls), TOOLS);
        assert_eq!(tools_condition(&[Message::ai("answer")]), END);
        assert_eq!(tools_condition(&[]), END);
    }
}
