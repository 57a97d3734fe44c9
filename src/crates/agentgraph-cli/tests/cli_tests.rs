//! Integration tests for agentgraph-cli
//!
//! Agents are compiled through a [`Session`] with scripted models, and
//! interrupts are answered by a scripted [`Human`].

use agentgraph_agents::agents::email::{DONE, WRITE_EMAIL};
use agentgraph_agents::sql::toolkit::{QUERY, SCHEMA};
use agentgraph_agents::SqliteDatabase;
use agentgraph_cli::session::describe;
use agentgraph_cli::{AgentKind, AppConfig, Deps, Human, Session};
use agentgraph_core::llm::{ResponseFormat, ScriptedChatModel, ToolCall};
use agentgraph_core::{Message, MessageRole};
use clap::ValueEnum;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;
use utils::ValidateConfig;

/// Answers from a queue and records every prompt
#[derive(Default)]
struct ScriptedHuman {
    answers: VecDeque<String>,
    prompts: Vec<String>,
}

impl ScriptedHuman {
    fn answering<const N: usize>(answers: [&str; N]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            prompts: Vec::new(),
        }
    }
}

impl Human for ScriptedHuman {
    fn ask(&mut self, prompt: &str) -> anyhow::Result<Option<String>> {
        self.prompts.push(prompt.to_string());
        Ok(self.answers.pop_front())
    }
}

async fn deps_with(model: ScriptedChatModel) -> Deps {
    let mut deps = Deps::offline().await.unwrap();
    deps.model = Arc::new(model);
    deps
}

fn email_model() -> ScriptedChatModel {
    ScriptedChatModel::from_fn(|request| {
        if let Some(ResponseFormat::JsonSchema { .. }) = &request.response_format {
            let classification = if request.messages[1].content.contains("Newsletter") {
                "ignore"
            } else {
                "respond"
            };
            return Ok(Message::ai(
                json!({"reasoning": "read it", "classification": classification}).to_string(),
            ));
        }
        let answered = request.messages.last().map(|m| m.role == MessageRole::Tool).unwrap_or(false);
        let call = if answered {
            ToolCall::new("done", DONE, json!({"done": true}))
        } else {
            ToolCall::new(
                "draft",
                WRITE_EMAIL,
                json!({"to": "alice@company.com", "subject": "Re: Docs", "content": "On it."}),
            )
        };
        Ok(Message::ai("").with_tool_calls(vec![call]))
    })
}

#[tokio::test]
async fn test_email_draft_is_accepted_on_input() {
    let session = Session::new(AppConfig::default());
    let agent = session.compile(AgentKind::Email, deps_with(email_model()).await).unwrap();
    let mut human = ScriptedHuman::answering(["accept"]);

    let email = r#"{"author": "Alice <alice@company.com>", "to": "me@company.com", "subject": "Docs", "email_thread": "Which endpoints are missing?"}"#;
    let answer = agent.ask(email, &session.run_config("mail-1"), &mut human).await.unwrap();

    assert_eq!(human.prompts.len(), 1);
    assert!(human.prompts[0].contains("**Subject**: Docs"));
    assert!(human.prompts[0].contains("Reply with accept"));
    assert!(answer.starts_with("Classification: respond"));
    assert!(answer.contains("Email sent to alice@company.com with subject 'Re: Docs' and content: On it."));
}

#[tokio::test]
async fn test_newsletter_needs_no_human() {
    let session = Session::new(AppConfig::default());
    let agent = session.compile(AgentKind::Email, deps_with(email_model()).await).unwrap();
    let mut human = ScriptedHuman::default();

    let answer = agent
        .ask("Newsletter: what's new this month", &session.run_config("mail-2"), &mut human)
        .await
        .unwrap();

    assert!(human.prompts.is_empty());
    assert_eq!(answer, "Classification: ignore");
}

#[tokio::test]
async fn test_closed_input_while_waiting_fails() {
    let session = Session::new(AppConfig::default());
    let agent = session.compile(AgentKind::Email, deps_with(email_model()).await).unwrap();
    let mut human = ScriptedHuman::default();

    let err = agent
        .ask("Can you review my PR?", &session.run_config("mail-3"), &mut human)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("input closed"), "{err}");
}

#[tokio::test]
async fn test_sql_agent_through_session() {
    let db = SqliteDatabase::from_script(
        "CREATE TABLE Genre (GenreId INTEGER PRIMARY KEY, Name TEXT);
         INSERT INTO Genre VALUES (1, 'Rock'), (2, 'Jazz');",
    )
    .await
    .unwrap();
    let model = ScriptedChatModel::new([
        Message::ai("").with_tool_calls(vec![ToolCall::new("s", SCHEMA, json!({"table_names": "Genre"}))]),
        Message::ai("").with_tool_calls(vec![ToolCall::new("q", QUERY, json!({"query": "SELECT Name FROM Genre"}))]),
        Message::ai("").with_tool_calls(vec![ToolCall::new("q", QUERY, json!({"query": "SELECT Name FROM Genre"}))]),
        Message::ai("The genres are Rock and Jazz."),
    ]);
    let mut deps = deps_with(model).await;
    deps.db = Arc::new(db);

    let session = Session::new(AppConfig::default());
    let agent = session.compile(AgentKind::Sql, deps).unwrap();
    let answer = agent
        .ask("Which genres exist?", &session.run_config("sql-1"), &mut ScriptedHuman::default())
        .await
        .unwrap();

    assert_eq!(answer, "The genres are Rock and Jazz.");
}

#[tokio::test]
async fn test_deep_agent_file_write_is_approved_on_input() {
    let model = ScriptedChatModel::from_fn(|request| {
        let last = request.messages.last().unwrap();
        if last.role == MessageRole::Tool {
            return Ok(Message::ai("Report saved."));
        }
        Ok(Message::ai("").with_tool_calls(vec![ToolCall::new(
            "w",
            "write_file",
            json!({"file_path": "/final_report.md", "content": "# Report"}),
        )]))
    });
    let session = Session::new(AppConfig::default());
    let agent = session.compile(AgentKind::DeepAgent, deps_with(model).await).unwrap();
    let mut human = ScriptedHuman::answering(["approve"]);

    let answer = agent
        .ask("Write a report on Rust", &session.run_config("deep-1"), &mut human)
        .await
        .unwrap();

    assert_eq!(human.prompts.len(), 1);
    assert!(human.prompts[0].contains("File: /final_report.md"));
    assert_eq!(answer, "Report saved.\n\nFiles written: /final_report.md");
}

#[tokio::test]
async fn test_every_agent_draws_offline() {
    let session = Session::new(AppConfig::default());
    for kind in AgentKind::value_variants() {
        let agent = session.compile(*kind, Deps::offline().await.unwrap()).unwrap();
        let chart = agent.draw_mermaid();
        assert!(chart.contains("graph TD"), "{kind}");
        assert!(chart.contains(&format!("title: {}", agent.name())), "{kind}");
    }
}

#[test]
fn test_config_file_is_layered_and_validated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agentgraph.json");
    std::fs::write(&path, r#"{"model": "anthropic:claude-3-5-sonnet-latest", "recursion_limit": 40}"#).unwrap();

    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.recursion_limit, 40);
    assert_eq!(config.top_k, 5);
    config.validate().unwrap();

    let bad = dir.path().join("bad.yaml");
    std::fs::write(&bad, "model: nobody:model\n").unwrap();
    assert!(AppConfig::load(Some(&bad)).unwrap().validate().is_err());
}

#[test]
fn test_static_pause_is_described() {
    let interrupt: agentgraph_core::interrupt::Interrupt = serde_json::from_value(json!({
        "id": "t1",
        "node": "human_feedback",
        "value": null,
        "kind": "before"
    }))
    .unwrap();
    assert_eq!(
        describe(&interrupt),
        "The agent paused at 'human_feedback' and needs more context:"
    );
}
