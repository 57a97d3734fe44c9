//! Suspending, inspecting, editing and resuming persisted runs.

use agentgraph_core::state::{AddMessages, Append, Overwrite};
use agentgraph_core::{
    graph_state, CheckpointSaver, Command, CompileOptions, CompiledGraph, GraphError,
    InMemoryCheckpointSaver, InMemoryStore, InterruptKind, Message, NodeContext, RunConfig,
    RunOutcome, StateGraph, StreamEvent, StreamMode, END, START,
};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

graph_state! {
    struct Support (SupportUpdate) {
        messages: Vec<agentgraph_core::Message> => AddMessages,
        customer_id: Option<String> => Overwrite,
        trail: Vec<String> => Append,
    }
}

/// Route to the human while no customer id is known
fn should_interrupt(state: &Support) -> &'static str {
    if state.customer_id.is_some() {
        "continue"
    } else {
        "interrupt"
    }
}

fn verification_graph() -> StateGraph<Support> {
    let mut graph = StateGraph::<Support>::new();
    graph.add_node("verify_info", |s: Support, _| async move {
        let last = s.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let digits: String = last.chars().filter(char::is_ascii_digit).collect();
        let mut update = SupportUpdate::default().trail(vec!["verify_info".to_string()]);
        if digits.is_empty() {
            update = update.messages(vec![Message::ai("Please share your customer id.")]);
        } else {
            update = update.customer_id(Some(digits));
        }
        Ok(update)
    });
    graph.add_node("human_input", |_, ctx: NodeContext| async move {
        let reply = ctx.interrupt("Please provide input.")?;
        let text = reply.as_str().unwrap_or_default().to_string();
        Ok(SupportUpdate::default()
            .messages(vec![Message::human(text)])
            .trail(vec!["human_input".to_string()]))
    });
    graph.add_node("answer", |s: Support, _| async move {
        let id = s.customer_id.unwrap_or_default();
        Ok(SupportUpdate::default()
            .messages(vec![Message::ai(format!("Thanks, customer {}", id))])
            .trail(vec!["answer".to_string()]))
    });
    graph.add_edge(START, "verify_info");
    graph.add_conditional_edges(
        "verify_info",
        should_interrupt,
        [("interrupt", "human_input"), ("continue", "answer")],
    );
    graph.add_edge("human_input", "verify_info");
    graph.add_edge("answer", END);
    graph
}

fn persisted(graph: StateGraph<Support>) -> CompiledGraph<Support> {
    graph
        .compile_with(CompileOptions::new().with_checkpointer(Arc::new(InMemoryCheckpointSaver::new())))
        .unwrap()
}

#[test]
fn test_should_interrupt_routes_on_identifier() {
    assert_eq!(should_interrupt(&Support::default()), "interrupt");
    let verified = Support {
        customer_id: Some("5".into()),
        ..Default::default()
    };
    assert_eq!(should_interrupt(&verified), "continue");
}

#[tokio::test]
async fn test_dynamic_interrupt_and_resume() {
    let graph = persisted(verification_graph());
    let config = RunConfig::for_thread("customer-chat");

    let first = graph
        .invoke_with_config(
            SupportUpdate::default().messages(vec![Message::human("How much was my last invoice?")]),
            &config,
        )
        .await
        .unwrap();
    assert!(first.is_interrupted());
    let interrupt = &first.interrupts()[0];
    assert_eq!(interrupt.node, "human_input");
    assert_eq!(interrupt.kind, InterruptKind::Dynamic);
    assert_eq!(interrupt.prompt(), Some("Please provide input."));
    assert!(first.state().customer_id.is_none());

    let snapshot = graph.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["human_input"]);
    assert_eq!(snapshot.interrupts.len(), 1);

    let resumed = graph
        .resume(&config, Command::resume("My customer id is 5"))
        .await
        .unwrap();
    let state = match resumed {
        RunOutcome::Complete(state) => state,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(state.customer_id.as_deref(), Some("5"));
    assert_eq!(
        state.trail,
        vec!["verify_info", "human_input", "verify_info", "answer"]
    );
    assert_eq!(state.messages.last().unwrap().content, "Thanks, customer 5");

    let done = graph.get_state(&config).await.unwrap().unwrap();
    assert!(done.next.is_empty());
    assert!(!done.is_interrupted());
}

/// Same graph as [`verification_graph`] with `human_input` answered inline
fn inline_answer_graph(answer: &'static str) -> StateGraph<Support> {
    let source = verification_graph();
    let mut graph = StateGraph::<Support>::new();
    for name in ["verify_info", "answer"] {
        let node = source.graph().nodes[name].func.clone();
        graph.add_node(name, move |s, ctx| node(s, ctx));
    }
    graph.add_node("human_input", move |_, _| async move {
        Ok(SupportUpdate::default()
            .messages(vec![Message::human(answer)])
            .trail(vec!["human_input".to_string()]))
    });
    graph.add_edge(START, "verify_info");
    graph.add_conditional_edges(
        "verify_info",
        should_interrupt,
        [("interrupt", "human_input"), ("continue", "answer")],
    );
    graph.add_edge("human_input", "verify_info");
    graph.add_edge("answer", END);
    graph
}

/// State with message ids removed; ids are random per run
fn comparable(state: &Support) -> serde_json::Value {
    let mut value = serde_json::to_value(state).unwrap();
    if let Some(messages) = value["messages"].as_array_mut() {
        for message in messages {
            if let Some(fields) = message.as_object_mut() {
                fields.remove("id");
            }
        }
    }
    value
}

#[tokio::test]
async fn test_resume_matches_inline_run() {
    let input = || SupportUpdate::default().messages(vec![Message::human("hi")]);

    let suspended = persisted(verification_graph());
    let config = RunConfig::for_thread("round-trip");
    let first = suspended.invoke_with_config(input(), &config).await.unwrap();
    assert!(first.is_interrupted());
    let resumed = suspended
        .resume(&config, Command::resume("id 42"))
        .await
        .unwrap()
        .into_state();

    let inline = inline_answer_graph("id 42")
        .compile()
        .unwrap()
        .invoke(input())
        .await
        .unwrap();

    assert_eq!(comparable(&resumed), comparable(&inline));
    assert_eq!(resumed.customer_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_completed_parallel_tasks_are_not_rerun() {
    let side_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&side_runs);

    let mut graph = StateGraph::<Support>::new();
    graph.add_node("side", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(SupportUpdate::default().trail(vec!["side".to_string()])) }
    });
    graph.add_node("ask", |_, ctx: NodeContext| async move {
        let answer: String = ctx.interrupt_as(json!({"question": "approve?"}))?;
        Ok(SupportUpdate::default().trail(vec![format!("ask:{}", answer)]))
    });
    graph.add_edge(START, "side").add_edge(START, "ask");
    graph.add_edge("side", END).add_edge("ask", END);
    let graph = persisted(graph);
    let config = RunConfig::for_thread("parallel");

    let first = graph.invoke_with_config(SupportUpdate::default(), &config).await.unwrap();
    assert!(first.is_interrupted());
    assert!(first.state().trail.is_empty(), "nothing merges while a task is suspended");

    let state = graph
        .resume(&config, Command::resume("yes"))
        .await
        .unwrap()
        .into_state();
    assert_eq!(side_runs.load(Ordering::SeqCst), 1);
    assert_eq!(state.trail, vec!["side", "ask:yes"]);
}

#[tokio::test]
async fn test_multiple_interrupts_in_one_node_match_by_order() {
    let mut graph = StateGraph::<Support>::new();
    graph.add_node("form", |_, ctx: NodeContext| async move {
        let name = ctx.interrupt("name?")?;
        let email = ctx.interrupt("email?")?;
        Ok(SupportUpdate::default().trail(vec![
            name.as_str().unwrap_or_default().to_string(),
            email.as_str().unwrap_or_default().to_string(),
        ]))
    });
    graph.set_entry_point("form").set_finish_point("form");
    let graph = persisted(graph);
    let config = RunConfig::for_thread("form");

    let first = graph.invoke_with_config(SupportUpdate::default(), &config).await.unwrap();
    assert_eq!(first.interrupts()[0].prompt(), Some("name?"));

    let second = graph.resume(&config, Command::resume("Ada")).await.unwrap();
    assert_eq!(second.interrupts()[0].prompt(), Some("email?"));

    let mut by_id = HashMap::new();
    by_id.insert(second.interrupts()[0].id.clone(), json!("ada@example.com"));
    let state = graph
        .resume(&config, Command::resume_map(by_id))
        .await
        .unwrap()
        .into_state();
    assert_eq!(state.trail, vec!["Ada", "ada@example.com"]);
}

fn two_step_graph() -> StateGraph<Support> {
    let mut graph = StateGraph::<Support>::new();
    graph.add_node("draft", |_, _| async {
        Ok(SupportUpdate::default().trail(vec!["draft".to_string()]))
    });
    graph.add_node("send", |s: Support, _| async move {
        let to = s.customer_id.unwrap_or_else(|| "nobody".to_string());
        Ok(SupportUpdate::default().trail(vec![format!("send:{}", to)]))
    });
    graph.add_edge(START, "draft").add_edge("draft", "send").add_edge("send", END);
    graph
}

#[tokio::test]
async fn test_interrupt_before_and_update_state() {
    let graph = two_step_graph()
        .compile_with(
            CompileOptions::new()
                .with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
                .interrupt_before(["send"]),
        )
        .unwrap();
    let config = RunConfig::for_thread("review");

    let first = graph.invoke_with_config(SupportUpdate::default(), &config).await.unwrap();
    assert_eq!(first.interrupts()[0].node, "send");
    assert_eq!(first.interrupts()[0].kind, InterruptKind::Before);
    assert_eq!(first.state().trail, vec!["draft"]);

    let snapshot = graph.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["send"]);
    assert_eq!(snapshot.interrupts[0].kind, InterruptKind::Before);

    graph
        .update_state(&config, SupportUpdate::default().customer_id(Some("7".to_string())), None)
        .await
        .unwrap();

    let state = graph.resume(&config, Command::new()).await.unwrap().into_state();
    assert_eq!(state.trail, vec!["draft", "send:7"]);
}

#[tokio::test]
async fn test_interrupt_after() {
    let graph = two_step_graph()
        .compile_with(
            CompileOptions::new()
                .with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
                .interrupt_after(["draft"]),
        )
        .unwrap();
    let config = RunConfig::for_thread("after");

    let first = graph.invoke_with_config(SupportUpdate::default(), &config).await.unwrap();
    assert_eq!(first.interrupts()[0].kind, InterruptKind::After);
    assert_eq!(first.state().trail, vec!["draft"]);

    let state = graph.resume(&config, Command::new()).await.unwrap().into_state();
    assert_eq!(state.trail, vec!["draft", "send:nobody"]);
}

#[tokio::test]
async fn test_update_state_as_node_schedules_successors() {
    let graph = persisted(two_step_graph());
    let config = RunConfig::for_thread("as-node");

    graph
        .update_state(&config, SupportUpdate::default().trail(vec!["manual".to_string()]), Some("draft"))
        .await
        .unwrap();
    let snapshot = graph.get_state(&config).await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["send"]);

    let state = graph.resume(&config, Command::new()).await.unwrap().into_state();
    assert_eq!(state.trail, vec!["manual", "send:nobody"]);

    let err = graph
        .update_state(&config, SupportUpdate::default(), Some("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Validation(_)));
}

#[tokio::test]
async fn test_state_history_newest_first() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let graph = two_step_graph()
        .compile_with(CompileOptions::new().with_checkpointer(saver.clone()))
        .unwrap();
    let config = RunConfig::for_thread("history");
    graph.invoke_with_config(SupportUpdate::default(), &config).await.unwrap();

    let history = graph.get_state_history(&config, None).await.unwrap();
    assert!(history.len() >= 3);
    assert!(history[0].next.is_empty());
    assert_eq!(history[0].values.trail, vec!["draft", "send:nobody"]);
    let steps: Vec<usize> = history.iter().map(|s| s.step).collect();
    let mut sorted = steps.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(steps, sorted);

    let limited = graph.get_state_history(&config, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert!(saver.get_tuple(&config.checkpoint_config().unwrap()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_thread_is_required_with_checkpointer() {
    let graph = persisted(two_step_graph());
    let err = graph
        .invoke_with_config(SupportUpdate::default(), &RunConfig::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
}

#[tokio::test]
async fn test_invoke_reports_interrupt_as_error() {
    let err = verification_graph()
        .compile()
        .unwrap()
        .invoke(SupportUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Interrupted { ref node, .. } if node == "human_input"));
}

#[tokio::test]
async fn test_stream_events() {
    let mut graph = two_step_graph();
    graph.add_node("notify", |_, ctx: NodeContext| async move {
        ctx.emit(json!({"progress": "half"}));
        Ok(SupportUpdate::default())
    });
    graph.add_edge(START, "notify").add_edge("notify", END);
    let compiled = graph.compile().unwrap();

    let events: Vec<StreamEvent<Support>> = compiled
        .stream(SupportUpdate::default(), RunConfig::new())
        .map(|event| event.unwrap())
        .collect()
        .await;

    let starts = events.iter().filter(|e| matches!(e, StreamEvent::TaskStart { .. })).count();
    assert_eq!(starts, 3);
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Custom { node, data } if node == "notify" && data["progress"] == "half"
    )));
    match events.last() {
        Some(StreamEvent::Done(state)) => assert_eq!(state.trail, vec!["draft", "send:nobody"]),
        other => panic!("expected Done, got {:?}", other),
    }

    let updates: Vec<StreamEvent<Support>> = compiled
        .stream_modes(SupportUpdate::default(), RunConfig::new(), &[StreamMode::Updates])
        .map(|event| event.unwrap())
        .collect()
        .await;
    assert!(updates
        .iter()
        .all(|e| matches!(e, StreamEvent::Update { .. } | StreamEvent::Done(_))));
    assert_eq!(updates.len(), 4);
}

#[tokio::test]
async fn test_stream_surfaces_interrupt_and_resume() {
    let graph = persisted(verification_graph());
    let config = RunConfig::for_thread("streamed");

    let events: Vec<_> = graph
        .stream(SupportUpdate::default(), config.clone())
        .map(|e| e.unwrap())
        .collect()
        .await;
    assert!(matches!(events.last(), Some(StreamEvent::Interrupt(i)) if i.node == "human_input"));

    let events: Vec<_> = graph
        .stream_resume(config, Command::resume("customer 9"))
        .map(|e| e.unwrap())
        .collect()
        .await;
    match events.last() {
        Some(StreamEvent::Done(state)) => assert_eq!(state.customer_id.as_deref(), Some("9")),
        other => panic!("expected Done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_store_reachable_from_nodes() {
    let store = Arc::new(InMemoryStore::new());
    let mut graph = StateGraph::<Support>::new();
    graph.add_node("remember", |_, ctx: NodeContext| async move {
        let store = ctx.require_store()?;
        let namespace = vec!["memory_profile".to_string(), "5".to_string()];
        store.put(&namespace, "user_memory", json!({"music_preferences": ["jazz"]})).await?;
        Ok(SupportUpdate::default())
    });
    graph.set_entry_point("remember").set_finish_point("remember");
    let graph = graph
        .compile_with(CompileOptions::new().with_store(store.clone()))
        .unwrap();
    graph.invoke(SupportUpdate::default()).await.unwrap();

    let namespace = vec!["memory_profile".to_string(), "5".to_string()];
    let item = agentgraph_core::Store::get(store.as_ref(), &namespace, "user_memory")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.value["music_preferences"][0], "jazz");
}
