//! Email triage with human review of outgoing actions
//!
//! ```text
//!   START ─▶ triage_router ──(ignore | notify)──▶ END
//!                 │
//!             (respond)
//!                 ▼
//!             llm_call ◀──────────────┐
//!                 │                   │
//!          (Done)─┴─(other tools)─▶ interrupt_handler ──(ignored)──▶ END
//! ```
//!
//! The router classifies the email. Emails worth answering go to a model
//! forced to call exactly one tool per turn. `write_email` and
//! `schedule_meeting` are shown to a human before they run; the reply is
//! one of
//!
//! - `{"type": "accept"}`: run the call as proposed
//! - `{"type": "edit", "args": {..}}`: run it with these arguments instead
//! - `{"type": "response", "args": "feedback"}`: do not run it, hand the
//!   feedback to the model
//! - `{"type": "ignore"}`: drop the draft and end the workflow
//!
//! Calendar lookups run without review. The workflow ends when the model
//! calls `Done`.

use crate::error::{AgentError, Result as AgentResult};
use crate::tools::{execute_tool_safely, object_schema, str_arg, string_param, FnTool, ToolContext, ToolRegistry};
use agentgraph_core::llm::{with_structured_output, ChatModel, ChatRequest, ToolCall, ToolChoice};
use agentgraph_core::messages::last_message;
use agentgraph_core::state::{AddMessages, Overwrite};
use agentgraph_core::{
    graph_state, CompileOptions, CompiledGraph, Message, NodeContext, Result, StateGraph, END, START,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const WRITE_EMAIL: &str = "write_email";
pub const SCHEDULE_MEETING: &str = "schedule_meeting";
pub const CHECK_CALENDAR: &str = "check_calendar_availability";
pub const DONE: &str = "Done";

const TRIAGE_PROMPT: &str = "< Role >
Your role is to triage incoming emails based upon instructs and background information below.
</ Role >

< Background >
I'm Robert, a software engineer at LangChain.
</ Background >

< Instructions >
Categorize each email into one of three categories:
1. IGNORE - Emails that are not worth responding to or tracking
2. NOTIFY - Important information that worth notification but doesn't require a response
3. RESPOND - Emails that need a direct response
Classify the below email into one of these categories.
</ Instructions >

< Rules >
Emails that are not worth responding to:
- Marketing newsletters and promotional emails
- Spam or suspicious emails
- CC'd on FYI threads with no direct questions

There are also other things that should be known about, but don't require an email response. For these, you should notify (using the `notify` response). Examples of this include:
- Team member out sick or on vacation
- Build system notifications or deployments
- Project status updates without action items
- Important company announcements
- FYI emails that contain relevant information for current projects
- HR Department deadline reminders
- GitHub notifications

Emails that are worth responding to:
- Direct questions from team members requiring expertise
- Meeting requests requiring confirmation
- Critical bug reports related to team's projects
- Requests from management requiring acknowledgment
- Client inquiries about project status or features
- Technical questions about documentation, code, or APIs (especially questions about missing endpoints or features)
- Personal reminders related to family (wife / daughter)
- Personal reminder related to self-care (doctor appointments, etc)
</ Rules >";

const ACTION_PROMPT: &str = "< Role >
You are a top-notch executive assistant who cares about helping your executive perform as well as possible.
</ Role >

< Tools >
You have access to the following tools to help manage communications and schedule:

1. write_email(to, subject, content) - Send emails to specified recipients
2. schedule_meeting(attendees, subject, duration_minutes, preferred_day, start_time) - Schedule calendar meetings
3. check_calendar_availability(day) - Check available time slots for a given day
4. Done - E-mail has been sent

Note: FOR EACH INPUT, ONLY EVER CALL ONE TOOL
</ Tools >

< Instructions >
When handling emails, follow these steps:
1. Carefully analyze the email content and purpose
2. For responding to the email, draft a response email with the write_email tool
3. For meeting requests, use the check_calendar_availability tool to find open time slots
4. To schedule a meeting, use the schedule_meeting tool with a YYYY-MM-DD date for the preferred_day parameter
   - Today's date is {today} - use this for scheduling meetings accurately
5. If you scheduled a meeting, then draft a short response email using the write_email tool
6. After using the write_email tool, the task is complete
7. If you have sent the email, then use the Done tool to indicate that the task is complete
</ Instructions >

< Background >
I'm Robert, a software engineer at LangChain.
</ Background >

< Response Preferences >
Use professional and concise language. If the e-mail mentions a deadline, make sure to explicitly acknowledge and reference the deadline in your response.

When responding to meeting scheduling requests:
- If the recipient is asking for a meeting commitment, verify availability for all time slots mentioned in the original email and then commit to one of the proposed times based on your availability by scheduling the meeting. Or, say you can't make it at the time proposed.
- If availability is asked for, then check your calendar for availability and send an email proposing multiple time options when available. Do NOT schedule meetings
- Mention the meeting duration in your response to confirm you've noted it correctly.
- Reference the meeting's purpose in your response.
</ Response Preferences >

< Calendar Preferences >
30 minute meetings are preferred, but 15 minute meetings are also acceptable.
Times later in the day are preferable.
</ Calendar Preferences >";

/// Incoming email
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailInput {
    pub author: String,
    pub to: String,
    pub subject: String,
    pub email_thread: String,
}

impl EmailInput {
    /// Markdown shown to the reviewer and handed to the response agent
    pub fn to_markdown(&self) -> String {
        format!(
            "\n\n**Subject**: {}\n**From**: {}\n**To**: {}\n\n{}\n\n---\n",
            self.subject, self.author, self.to, self.email_thread
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Ignore,
    Respond,
    Notify,
}

#[derive(Debug, Clone, Deserialize)]
struct RouterSchema {
    #[serde(default)]
    reasoning: String,
    classification: Classification,
}

/// A reviewer's answer to a proposed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "lowercase")]
pub enum ReviewResponse {
    Accept,
    Edit(Value),
    Response(String),
    Ignore,
}

graph_state! {
    pub struct EmailState (EmailUpdate) {
        pub email_input: EmailInput => Overwrite,
        pub classification_decision: Option<Classification> => Overwrite,
        pub messages: Vec<Message> => AddMessages,
        pub ignored: bool => Overwrite,
    }
}

fn schedule_meeting(args: &Value) -> AgentResult<String> {
    let subject = str_arg(args, "subject")?;
    let day = str_arg(args, "preferred_day")?;
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| AgentError::InvalidInput(format!("preferred_day '{}' is not a YYYY-MM-DD date: {}", day, e)))?;
    let attendees = args.get("attendees").and_then(Value::as_array).map_or(0, Vec::len);
    let duration = args.get("duration_minutes").and_then(Value::as_i64).unwrap_or_default();
    let start_time = args.get("start_time").and_then(Value::as_i64).unwrap_or_default();
    Ok(format!(
        "Meeting '{}' scheduled on {} at {} for {} minutes with {} attendees",
        subject,
        date.format("%A, %B %d, %Y"),
        start_time,
        duration,
        attendees
    ))
}

/// `write_email`, `schedule_meeting`, `check_calendar_availability` and `Done`
pub fn email_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with(FnTool::new(
            WRITE_EMAIL,
            "Write and send an email.",
            object_schema([
                ("to", string_param("Recipient address")),
                ("subject", string_param("Subject line")),
                ("content", string_param("Body of the email")),
            ]),
            |args| {
                Ok(format!(
                    "Email sent to {} with subject '{}' and content: {}",
                    str_arg(args, "to")?,
                    str_arg(args, "subject")?,
                    str_arg(args, "content")?
                ))
            },
        ))
        .with(FnTool::new(
            SCHEDULE_MEETING,
            "Schedule a calendar meeting.",
            json!({
                "type": "object",
                "properties": {
                    "attendees": {"type": "array", "items": {"type": "string"}, "description": "Attendee addresses"},
                    "subject": {"type": "string", "description": "Meeting subject"},
                    "duration_minutes": {"type": "integer", "description": "Length of the meeting"},
                    "preferred_day": {"type": "string", "description": "Day of the meeting as YYYY-MM-DD"},
                    "start_time": {"type": "integer", "description": "Start hour, e.g. 14"}
                },
                "required": ["attendees", "subject", "duration_minutes", "preferred_day", "start_time"]
            }),
            schedule_meeting,
        ))
        .with(FnTool::new(
            CHECK_CALENDAR,
            "Check calendar availability for a given day.",
            object_schema([("day", string_param("The day to check"))]),
            |args| Ok(format!("Available times on {}: 9:00 AM, 2:00 PM, 4:00 PM", str_arg(args, "day")?)),
        ))
        .with(FnTool::new(
            DONE,
            "E-mail has been sent.",
            json!({
                "type": "object",
                "properties": {"done": {"type": "boolean"}},
                "required": ["done"]
            }),
            |_| Ok("Done".to_string()),
        ))
}

/// Interrupt payload describing a proposed tool call
fn review_request(call: &ToolCall, email: &EmailInput) -> Value {
    let proposal = match call.name.as_str() {
        WRITE_EMAIL => format!(
            "# Email Draft\n\n**To**: {}\n**Subject**: {}\n\n{}",
            call.str_arg("to").unwrap_or_default(),
            call.str_arg("subject").unwrap_or_default(),
            call.str_arg("content").unwrap_or_default()
        ),
        _ => format!(
            "# Tool Call: {}\n\nArguments:\n{}",
            call.name,
            serde_json::to_string_pretty(&call.arguments).unwrap_or_default()
        ),
    };
    json!({
        "action_request": {"action": call.name, "args": call.arguments},
        "config": {"allow_ignore": true, "allow_respond": true, "allow_edit": true, "allow_accept": true},
        "description": format!("{}\n\n{}", email.to_markdown(), proposal),
    })
}

fn needs_review(name: &str) -> bool {
    matches!(name, WRITE_EMAIL | SCHEDULE_MEETING)
}

/// `interrupt_handler` while tool calls other than `Done` are pending
pub fn should_continue(state: &EmailState) -> &'static str {
    match last_message(&state.messages) {
        Some(last) if last.has_tool_calls() && !last.tool_calls.iter().any(|c| c.name == DONE) => {
            "interrupt_handler"
        }
        _ => END,
    }
}

pub struct EmailAssistant {
    model: Arc<dyn ChatModel>,
    options: CompileOptions,
}

impl EmailAssistant {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            options: CompileOptions::new(),
        }
    }

    /// Review needs a checkpointer to suspend
    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<CompiledGraph<EmailState>> {
        let registry = Arc::new(email_tools());
        let definitions = registry.definitions();
        let router_model = Arc::clone(&self.model);
        let model = self.model;

        let mut graph = StateGraph::<EmailState>::new();

        graph.add_node("triage_router", move |state: EmailState, _ctx: NodeContext| {
            let router = with_structured_output::<RouterSchema>(
                Arc::clone(&router_model),
                "RouterSchema",
                json!({
                    "type": "object",
                    "description": "Analyze the unread email and route it according to its content.",
                    "properties": {
                        "reasoning": {"type": "string", "description": "Step-by-step reasoning behind the classification."},
                        "classification": {
                            "type": "string",
                            "enum": ["ignore", "respond", "notify"],
                            "description": "The classification of an email: 'ignore' for irrelevant emails, 'notify' for important information that doesn't need a response, 'respond' for emails that need a reply"
                        }
                    },
                    "required": ["reasoning", "classification"]
                }),
            );
            async move {
                let email = &state.email_input;
                let user_prompt = format!(
                    "Please determine how to handle the below email thread:\n\nFrom: {}\nTo: {}\nSubject: {}\n{}",
                    email.author, email.to, email.subject, email.email_thread
                );
                let decision = router
                    .invoke(vec![Message::system(TRIAGE_PROMPT), Message::human(user_prompt)])
                    .await?;
                tracing::info!(
                    classification = ?decision.classification,
                    reasoning = %decision.reasoning,
                    "email triaged"
                );

                let mut update = EmailUpdate::default()
                    .classification_decision(Some(decision.classification))
                    .ignored(false);
                if decision.classification == Classification::Respond {
                    update = update.messages(vec![Message::human(format!(
                        "Respond to the email: {}",
                        email.to_markdown()
                    ))]);
                }
                Ok(update)
            }
        });

        graph.add_node("llm_call", move |state: EmailState, _ctx: NodeContext| {
            let model = Arc::clone(&model);
            let definitions = definitions.clone();
            async move {
                let today = chrono::Local::now().format("%Y-%m-%d").to_string();
                let request = ChatRequest::new(state.messages)
                    .with_system(ACTION_PROMPT.replace("{today}", &today))
                    .with_tools(definitions)
                    .with_tool_choice(ToolChoice::Required);
                let reply = model.chat(request).await?.message;
                Ok(EmailUpdate::default().messages(vec![reply]))
            }
        });

        graph.add_node("interrupt_handler", move |state: EmailState, ctx: NodeContext| {
            let registry = Arc::clone(&registry);
            async move {
                let Some(last) = last_message(&state.messages).cloned() else {
                    return Ok(EmailUpdate::default());
                };
                let tool_ctx = ToolContext::new();
                let mut results = Vec::new();
                let mut revised = last.clone();
                let mut edited = false;

                for (index, call) in last.tool_calls.iter().enumerate() {
                    if !needs_review(&call.name) {
                        let output = execute_tool_safely(&registry, call, &tool_ctx).await;
                        results.push(Message::tool(output, call.id.clone()));
                        continue;
                    }

                    let review: ReviewResponse = ctx.interrupt_as(review_request(call, &state.email_input))?;
                    tracing::info!(tool = %call.name, review = ?review, "action reviewed");
                    match review {
                        ReviewResponse::Accept => {
                            let output = execute_tool_safely(&registry, call, &tool_ctx).await;
                            results.push(Message::tool(output, call.id.clone()));
                        }
                        ReviewResponse::Edit(args) => {
                            let call = ToolCall::new(call.id.clone(), call.name.clone(), args);
                            let output = execute_tool_safely(&registry, &call, &tool_ctx).await;
                            revised.tool_calls[index] = call.clone();
                            edited = true;
                            results.push(Message::tool(output, call.id));
                        }
                        ReviewResponse::Response(feedback) => {
                            let content = match call.name.as_str() {
                                WRITE_EMAIL => format!(
                                    "User gave feedback, which can we incorporate into the email. Feedback: {}",
                                    feedback
                                ),
                                _ => format!(
                                    "User gave feedback, which can we incorporate into the meeting request. Feedback: {}",
                                    feedback
                                ),
                            };
                            results.push(Message::tool(content, call.id.clone()));
                        }
                        ReviewResponse::Ignore => {
                            let content = match call.name.as_str() {
                                WRITE_EMAIL => "User ignored this email draft. Ignore this email and end the workflow.",
                                _ => "User ignored this calendar meeting draft. Ignore this email and end the workflow.",
                            };
                            results.push(Message::tool(content, call.id.clone()));
                            let mut update = EmailUpdate::default().ignored(true);
                            if edited {
                                results.insert(0, revised);
                            }
                            update = update.messages(results);
                            return Ok(update);
                        }
                    }
                }

                if edited {
                    // same id, so the reviewed arguments replace the proposal
                    results.insert(0, revised);
                }
                Ok(EmailUpdate::default().messages(results))
            }
        });

        graph
            .add_edge(START, "triage_router")
            .add_conditional_edges(
                "triage_router",
                |state: &EmailState| match state.classification_decision {
                    Some(Classification::Respond) => "respond",
                    _ => END,
                },
                [("respond", "llm_call"), (END, END)],
            )
            .add_conditional_edges(
                "llm_call",
                should_continue,
                [("interrupt_handler", "interrupt_handler"), (END, END)],
            )
            .add_conditional_edges(
                "interrupt_handler",
                |state: &EmailState| if state.ignored { END } else { "llm_call" },
                [("llm_call", "llm_call"), (END, END)],
            );

        graph.compile_with(self.options.with_name("email_assistant"))
    }
}
