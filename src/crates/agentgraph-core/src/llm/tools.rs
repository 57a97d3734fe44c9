//! Tool calling types
//!
//! 1. Bind [`ToolDefinition`]s to a request with
//!    [`ChatRequest::with_tools`](super::ChatRequest::with_tools)
//! 2. The model answers with [`ToolCall`]s on its assistant message
//! 3. The caller runs each tool and replies with a
//!    [`Message::tool`](crate::Message::tool) carrying the call id
//! 4. The model continues with the observations in its history
//!
//! ```rust,ignore
//! let lookup = ToolDefinition::new("sql_db_schema", "Get the schema of tables")
//!     .with_parameters(json!({
//!         "type": "object",
//!         "properties": {"table_names": {"type": "string"}},
//!         "required": ["table_names"]
//!     }));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique within one request
    pub name: String,

    /// Tells the model when the tool is useful
    pub description: String,

    /// JSON Schema of the arguments object
    pub parameters: JsonValue,
}

impl ToolDefinition {
    /// Tool without arguments
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Echoed back in the tool message that answers this call
    pub id: String,
    pub name: String,
    /// Arguments object, expected to match the tool's schema
    pub arguments: JsonValue,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// String argument by name
    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(JsonValue::as_str)
    }

    /// Decode the arguments into a typed struct
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        Ok(serde_json::from_value(self.arguments.clone())?)
    }
}
