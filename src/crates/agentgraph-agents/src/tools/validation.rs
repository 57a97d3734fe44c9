//! Argument checks against a tool's JSON schema
//!
//! Models occasionally call tools with missing or mistyped arguments. The
//! registry checks the top level of the arguments against the tool's
//! `parameters` schema before running it, so the model gets a precise
//! observation ("missing required argument 'query'") instead of whatever
//! the tool would have failed with.
//!
//! Only what the tools in this crate declare is checked: `type: object`,
//! `required`, and the JSON type of each declared property. Undeclared
//! properties are allowed.

use crate::error::{AgentError, Result};
use serde_json::Value;

/// JSON type named by a schema's `type` keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn from_schema(schema: &Value) -> Option<Self> {
        match schema.get("type")?.as_str()? {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            // models send 3.0 for integer fields often enough to allow it
            Self::Integer => value.is_i64() || value.is_u64() || value.as_f64().map_or(false, |f| f.fract() == 0.0),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Check `args` against an object `schema`
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<()> {
    if ParameterType::from_schema(schema) != Some(ParameterType::Object) {
        return Ok(());
    }
    let object = args
        .as_object()
        .ok_or_else(|| AgentError::InvalidInput(format!("arguments must be a JSON object, got {}", args)))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if object.get(name).map_or(true, Value::is_null) {
                return Err(AgentError::InvalidInput(format!("missing required argument '{}'", name)));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            let (Some(value), Some(expected)) = (object.get(name), ParameterType::from_schema(property)) else {
                continue;
            };
            if !value.is_null() && !expected.matches(value) {
                return Err(AgentError::InvalidInput(format!(
                    "argument '{}' must be of type {}, got {}",
                    name,
                    expected.as_str(),
                    value
                )));
            }
        }
    }
    Ok(())
}

/// `{"type": "string", "description": ..}`
pub fn string_param(description: &str) -> Value {
    serde_json::json!({"type": "string", "description": description})
}

/// `{"type": "integer", "description": ..}`
pub fn integer_param(description: &str) -> Value {
    serde_json::json!({"type": "integer", "description": description})
}

/// Object schema from `(name, property)` pairs, all of them required
pub fn object_schema<'a>(properties: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, property) in properties {
        required.push(Value::String(name.to_string()));
        props.insert(name.to_string(), property);
    }
    serde_json::json!({"type": "object", "properties": props, "required": required})
}
