//! Tools of the research supervisor and the researchers

use crate::tools::{object_schema, str_arg, string_param, FnTool, Tool};
use agentgraph_core::llm::ToolDefinition;
use serde_json::json;

pub const CONDUCT_RESEARCH: &str = "ConductResearch";
pub const RESEARCH_COMPLETE: &str = "ResearchComplete";
pub const THINK_TOOL: &str = "think_tool";

/// Reflection the model writes down between searches
pub fn think_tool() -> FnTool {
    FnTool::new(
        THINK_TOOL,
        "Strategic reflection tool for research planning. Use it after each search to analyze results and plan next steps.",
        object_schema([(
            "reflection",
            string_param("Detailed reflection on research progress and next steps"),
        )]),
        |args| Ok(format!("Reflection recorded: {}", str_arg(args, "reflection")?)),
    )
}

/// Signal that research is done; the loops stop on the call itself
pub fn research_complete() -> FnTool {
    FnTool::new(
        RESEARCH_COMPLETE,
        "Call this tool to indicate that the research is complete.",
        json!({"type": "object", "properties": {}}),
        |_| Ok("Research complete".to_string()),
    )
}

/// Delegation to a researcher; the supervisor runs it, not a registry
pub fn conduct_research() -> ToolDefinition {
    ToolDefinition::new(CONDUCT_RESEARCH, "Call this tool to conduct research on a specific topic.").with_parameters(
        object_schema([(
            "research_topic",
            string_param(
                "The topic to research. Should be a single topic, and should be described in high detail (at least a paragraph).",
            ),
        )]),
    )
}

/// Definitions offered to the supervisor
pub fn supervisor_tools() -> Vec<ToolDefinition> {
    vec![conduct_research(), research_complete().definition(), think_tool().definition()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContext;

    #[tokio::test]
    async fn test_think_tool_records() {
        let out = think_tool()
            .execute(json!({"reflection": "search Tokio next"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(out, "Reflection recorded: search Tokio next");
    }

    #[test]
    fn test_supervisor_tools() {
        let names: Vec<String> = supervisor_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![CONDUCT_RESEARCH, RESEARCH_COMPLETE, THINK_TOOL]);
    }
}
