//! Human-in-the-loop interrupts
//!
//! A run can suspend in three ways:
//!
//! | Kind | Trigger | Resume behavior |
//! |------|---------|-----------------|
//! | before | node listed in `interrupt_before` is about to run | the node runs |
//! | after | node listed in `interrupt_after` just ran | the next superstep runs |
//! | dynamic | node called [`NodeContext::interrupt`](crate::NodeContext::interrupt) | the node re-runs and the call returns the resume value |
//!
//! ```text
//!  run ──▶ verify_info ──▶ human_input ─┐
//!                                       │ ctx.interrupt("Please provide input.")
//!                                       ▼
//!                   RunOutcome::Interrupted { interrupts: [Interrupt { value, .. }] }
//!                                       │
//!  resume(Command::resume("my id is 5")) │
//!                                       ▼
//!                          human_input re-runs, interrupt(..) returns "my id is 5"
//! ```
//!
//! A node that calls `interrupt` more than once gets its resume values
//! matched by call order, so it must call `interrupt` the same number of
//! times in the same order on every re-run.
//!
//! Resuming requires a checkpointer: the suspended superstep, including the
//! updates of any parallel tasks that had already finished, is read back
//! from it. Finished tasks are not re-run.
//!
//! The [`HumanInterrupt`] / [`HumanResponse`] pair is a structured protocol
//! for reviewing a pending tool call (accept, edit, respond, ignore).

use agentgraph_checkpoint::InterruptKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A suspension point surfaced to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Unique id, usable as a key in [`Resume::ById`]
    pub id: String,

    /// Node that suspended (or is about to run, for `before`)
    pub node: String,

    /// Payload shown to the human: a prompt, a draft, a tool call to review
    pub value: Value,

    pub kind: InterruptKind,
}

impl Interrupt {
    pub fn dynamic(id: impl Into<String>, node: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            value,
            kind: InterruptKind::Dynamic,
        }
    }

    pub(crate) fn static_point(task_id: &str, node: &str, kind: InterruptKind) -> Self {
        Self {
            id: task_id.to_string(),
            node: node.to_string(),
            value: Value::Null,
            kind,
        }
    }

    /// The payload as text, when it is a JSON string
    pub fn prompt(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Value(s) handed back to suspended nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resume {
    /// Given to every pending dynamic interrupt
    Value(Value),
    /// Keyed by [`Interrupt::id`]; interrupts without an entry stay pending
    ById(HashMap<String, Value>),
}

impl Resume {
    pub(crate) fn value_for(&self, interrupt_id: &str) -> Option<Value> {
        match self {
            Resume::Value(value) => Some(value.clone()),
            Resume::ById(map) => map.get(interrupt_id).cloned(),
        }
    }
}

/// Instructions for continuing a suspended run
#[derive(Debug, Clone)]
pub struct Command<U> {
    pub resume: Option<Resume>,
    /// Applied to the state before the run continues
    pub update: Option<U>,
}

impl<U> Default for Command<U> {
    fn default() -> Self {
        Self {
            resume: None,
            update: None,
        }
    }
}

impl<U> Command<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume every pending interrupt with `value`
    pub fn resume(value: impl Into<Value>) -> Self {
        Self {
            resume: Some(Resume::Value(value.into())),
            update: None,
        }
    }

    /// Resume specific interrupts by id
    pub fn resume_map(values: HashMap<String, Value>) -> Self {
        Self {
            resume: Some(Resume::ById(values)),
            update: None,
        }
    }

    pub fn with_update(mut self, update: U) -> Self {
        self.update = Some(update);
        self
    }
}

/// Tool call awaiting review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub args: Value,
}

/// Which responses a reviewer may give
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanInterruptConfig {
    pub allow_ignore: bool,
    pub allow_respond: bool,
    pub allow_edit: bool,
    pub allow_accept: bool,
}

impl HumanInterruptConfig {
    pub fn all() -> Self {
        Self {
            allow_ignore: true,
            allow_respond: true,
            allow_edit: true,
            allow_accept: true,
        }
    }

    pub fn permits(&self, response: &HumanResponse) -> bool {
        match response {
            HumanResponse::Accept => self.allow_accept,
            HumanResponse::Edit(_) => self.allow_edit,
            HumanResponse::Respond(_) => self.allow_respond,
            HumanResponse::Ignore => self.allow_ignore,
        }
    }
}

/// Interrupt payload asking a human to review an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInterrupt {
    pub action_request: ActionRequest,
    pub config: HumanInterruptConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A reviewer's decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "lowercase")]
pub enum HumanResponse {
    /// Run the action as proposed
    #[serde(alias = "approve")]
    Accept,
    /// Run the action with replaced arguments
    Edit(ActionRequest),
    /// Do not run the action; feed this text back instead
    Respond(String),
    /// Drop the action
    #[serde(alias = "reject")]
    Ignore,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_human_response_wire_format() {
        let accept: HumanResponse = serde_json::from_value(json!({"type": "accept"})).unwrap();
        assert_eq!(accept, HumanResponse::Accept);

        let respond: HumanResponse =
            serde_json::from_value(json!({"type": "respond", "args": "use Tuesday"})).unwrap();
        assert_eq!(respond, HumanResponse::Respond("use Tuesday".into()));

        let edit = HumanResponse::Edit(ActionRequest {
            action: "write_email".into(),
            args: json!({"to": "a@b.c"}),
        });
        let value = serde_json::to_value(&edit).unwrap();
        assert_eq!(value["type"], "edit");
        assert_eq!(value["args"]["action"], "write_email");

        let approve: HumanResponse = serde_json::from_value(json!({"type": "approve"})).unwrap();
        assert_eq!(approve, HumanResponse::Accept);
        let reject: HumanResponse = serde_json::from_value(json!({"type": "reject"})).unwrap();
        assert_eq!(reject, HumanResponse::Ignore);
    }

    #[test]
    fn test_config_permits() {
        let config = HumanInterruptConfig {
            allow_ignore: false,
            ..HumanInterruptConfig::all()
        };
        assert!(config.permits(&HumanResponse::Accept));
        assert!(!config.permits(&HumanResponse::Ignore));
    }

    #[test]
    fn test_resume_value_for() {
        let all = Resume::Value(json!("yes"));
        assert_eq!(all.value_for("any"), Some(json!("yes")));

        let by_id = Resume::ById(HashMap::from([("a".to_string(), json!(1))]));
        assert_eq!(by_id.value_for("a"), Some(json!(1)));
        assert_eq!(by_id.value_for("b"), None);
    }

    #[test]
    fn test_command_builders() {
        let command: Command<()> = Command::resume("5").with_update(());
        assert_eq!(command.resume, Some(Resume::Value(json!("5"))));
        assert!(command.update.is_some());
    }
}
