//! End-to-end execution tests: routing, loops, fan-out, retries and the
//! retrieval/generation patterns agents are built from.

use agentgraph_core::error::Result;
use agentgraph_core::state::{Append, Overwrite, Sum};
use agentgraph_core::{
    filter_relevant, graph_state, route_grade, CompileOptions, Document, DocumentGrader, GraphError, NodeContext,
    RetryPolicy, RunConfig, StateGraph, END, START,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

graph_state! {
    struct Loop (LoopUpdate) {
        attempts: u32 => Overwrite,
        log: Vec<String> => Append,
    }
}

#[tokio::test]
async fn test_bounded_loop_terminates() {
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node("generate", |s: Loop, _| async move {
        Ok(LoopUpdate::default()
            .attempts(s.attempts + 1)
            .log(vec![format!("attempt {}", s.attempts + 1)]))
    });
    graph.add_edge(START, "generate");
    graph.add_conditional_edges(
        "generate",
        |s: &Loop| if s.attempts < 3 { "again" } else { "done" },
        [("again", "generate"), ("done", END)],
    );

    let state = graph.compile().unwrap().invoke(LoopUpdate::default()).await.unwrap();
    assert_eq!(state.attempts, 3);
    assert_eq!(state.log, vec!["attempt 1", "attempt 2", "attempt 3"]);
}

#[tokio::test]
async fn test_recursion_limit_stops_unbounded_loop() {
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node("spin", |s: Loop, _| async move { Ok(LoopUpdate::default().attempts(s.attempts + 1)) });
    graph.add_edge(START, "spin").add_edge("spin", "spin");

    let compiled = graph.compile().unwrap();
    let err = compiled
        .invoke_with_config(LoopUpdate::default(), &RunConfig::new().with_recursion_limit(5))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit { limit: 5 }));
}

#[tokio::test]
async fn test_graph_floor_raises_low_recursion_limit() {
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node("generate", |s: Loop, _| async move { Ok(LoopUpdate::default().attempts(s.attempts + 1)) });
    graph.add_edge(START, "generate");
    graph.add_conditional_edges(
        "generate",
        |s: &Loop| if s.attempts < 30 { "again" } else { "done" },
        [("again", "generate"), ("done", END)],
    );

    let compiled = graph.compile_with(CompileOptions::new().with_min_recursion_limit(30)).unwrap();
    assert_eq!(compiled.min_recursion_limit(), 30);

    let state = compiled.invoke(LoopUpdate::default()).await.unwrap();
    assert_eq!(state.attempts, 30);

    let outcome = compiled
        .invoke_with_config(LoopUpdate::default(), &RunConfig::new().with_recursion_limit(3))
        .await
        .unwrap();
    assert_eq!(outcome.state().attempts, 30);
}

#[tokio::test]
async fn test_remaining_steps_visible_to_nodes() {
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node("a", |_, ctx: NodeContext| async move {
        Ok(LoopUpdate::default().log(vec![ctx.remaining_steps().to_string()]))
    });
    graph.add_node("b", |_, ctx: NodeContext| async move {
        Ok(LoopUpdate::default().log(vec![ctx.remaining_steps().to_string()]))
    });
    graph.add_edge(START, "a").add_edge("a", "b").add_edge("b", END);

    let outcome = graph
        .compile()
        .unwrap()
        .invoke_with_config(LoopUpdate::default(), &RunConfig::new().with_recursion_limit(10))
        .await
        .unwrap();
    assert_eq!(outcome.into_state().log, vec!["10", "9"]);
}

#[tokio::test]
async fn test_undeclared_label_fails_at_first_use() {
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node("a", |_, _| async { Ok(LoopUpdate::default()) });
    graph.add_edge(START, "a");
    graph.add_conditional_edges("a", |_: &Loop| "elsewhere", [("done", END)]);

    let err = graph.compile().unwrap().invoke(LoopUpdate::default()).await.unwrap_err();
    assert!(matches!(
        err,
        GraphError::Routing { ref node, ref label } if node == "a" && label == "elsewhere"
    ));
}

graph_state! {
    struct Fan (FanUpdate) {
        items: Vec<u32> => Append,
        last: u32 => Overwrite,
        total: u32 => Sum,
    }
}

fn fan_graph(delays: Vec<u64>) -> StateGraph<Fan> {
    let delays = Arc::new(delays);
    let mut graph = StateGraph::<Fan>::new();
    graph.add_node("fan", |_, _| async { Ok(FanUpdate::default()) });
    graph.add_node("worker", move |s: Fan, _| {
        let delay = delays[(s.last as usize - 1) % delays.len()];
        async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(FanUpdate::default().items(vec![s.last]).last(s.last).total(s.last))
        }
    });
    graph.add_edge(START, "fan");
    graph.add_dynamic_edges("fan", |_: &Fan| {
        (1..=5)
            .map(|i| agentgraph_core::Send::new("worker", Fan { last: i, ..Default::default() }))
            .collect::<Vec<_>>()
    });
    graph.add_edge("worker", END);
    graph
}

#[tokio::test]
async fn test_fan_out_merge_is_independent_of_completion_order() {
    let orders = [
        vec![1, 2, 3, 4, 5],
        vec![25, 20, 15, 10, 5],
        vec![10, 30, 0, 20, 5],
    ];
    for delays in orders {
        let state = fan_graph(delays).compile().unwrap().invoke(FanUpdate::default()).await.unwrap();
        assert_eq!(state.items, vec![1, 2, 3, 4, 5]);
        assert_eq!(state.last, 5, "overwrite follows branch order");
        assert_eq!(state.total, 15);
    }
}

#[tokio::test]
async fn test_node_reached_twice_in_one_step_runs_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let mut graph = StateGraph::<Fan>::new();
    graph
        .add_node("left", |_, _| async { Ok(FanUpdate::default().items(vec![1])) })
        .add_node("right", |_, _| async { Ok(FanUpdate::default().items(vec![2])) })
        .add_node("join", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(FanUpdate::default().total(1u32)) }
        });
    graph
        .add_edge(START, "left")
        .add_edge(START, "right")
        .add_edge("left", "join")
        .add_edge("right", "join")
        .add_edge("join", END);

    let state = graph.compile().unwrap().invoke(FanUpdate::default()).await.unwrap();
    assert_eq!(state.items, vec![1, 2]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_node_retry_policy_runs_exactly_n_times() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node_with_retry(
        "flaky",
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<LoopUpdate, _>(GraphError::Custom("upstream unavailable".into())) }
        },
        RetryPolicy::immediate(3),
    );
    graph.set_entry_point("flaky").set_finish_point("flaky");

    let err = graph.compile().unwrap().invoke(LoopUpdate::default()).await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(err, GraphError::NodeExecution { ref node, .. } if node == "flaky"));
}

#[tokio::test]
async fn test_node_timeout() {
    let mut graph = StateGraph::<Loop>::new();
    graph.add_node("slow", |_, _| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(LoopUpdate::default())
    });
    graph.set_entry_point("slow").set_finish_point("slow");

    let config = RunConfig::new().with_node_timeout(Duration::from_millis(20));
    let err = graph
        .compile()
        .unwrap()
        .invoke_with_config(LoopUpdate::default(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Timeout { .. }));
}

// Retrieval and grounded generation, as the RAG agents wire them.

graph_state! {
    struct Rag (RagUpdate) {
        question: String => Overwrite,
        documents: Vec<Document> => Overwrite,
        generation: Option<String> => Overwrite,
        attempts: u32 => Overwrite,
    }
}

struct ContainsGrader;

#[async_trait]
impl DocumentGrader for ContainsGrader {
    async fn is_relevant(&self, question: &str, document: &Document) -> Result<bool> {
        Ok(document.page_content.contains(question))
    }
}

const MAX_ATTEMPTS: u32 = 3;

/// retrieve → grade_documents → (none → END | some → generate → check → ...)
fn rag_graph(
    corpus: Vec<Document>,
    grounded_on: Vec<bool>,
    generations: Arc<AtomicUsize>,
) -> StateGraph<Rag> {
    let corpus = Arc::new(corpus);
    let grounded_on = Arc::new(grounded_on);
    let mut graph = StateGraph::<Rag>::new();

    graph.add_node("retrieve", move |_, _| {
        let docs = corpus.as_ref().clone();
        async move { Ok(RagUpdate::default().documents(docs)) }
    });
    graph.add_node("grade_documents", |s: Rag, _| async move {
        let kept = filter_relevant(&s.question, s.documents, &ContainsGrader, 4).await?;
        Ok(RagUpdate::default().documents(kept))
    });
    graph.add_node("generate", move |s: Rag, _| {
        generations.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok(RagUpdate::default()
                .generation(Some(format!("draft {}", s.attempts + 1)))
                .attempts(s.attempts + 1))
        }
    });
    graph.add_node("check", |_, _| async { Ok(RagUpdate::default()) });
    graph.add_node("give_up", |s: Rag, _| async move {
        Err::<RagUpdate, _>(GraphError::RetryExhausted {
            attempts: s.attempts,
            reason: "generation not grounded in documents".into(),
        })
    });

    graph.add_edge(START, "retrieve").add_edge("retrieve", "grade_documents");
    graph.add_conditional_edges(
        "grade_documents",
        |s: &Rag| if s.documents.is_empty() { "none" } else { "some" },
        [("none", END), ("some", "generate")],
    );
    graph.add_edge("generate", "check");
    graph.add_conditional_edges(
        "check",
        move |s: &Rag| {
            let grounded = grounded_on
                .get(s.attempts as usize - 1)
                .copied()
                .unwrap_or(false);
            route_grade(s.attempts, grounded, MAX_ATTEMPTS).label()
        },
        [("accept", END), ("retry", "generate"), ("exhausted", "give_up")],
    );
    graph.set_finish_point("give_up");
    graph
}

#[tokio::test]
async fn test_no_relevant_documents_ends_without_generation() {
    let generations = Arc::new(AtomicUsize::new(0));
    let graph = rag_graph(Vec::new(), vec![true], Arc::clone(&generations));
    let state = graph
        .compile()
        .unwrap()
        .invoke(RagUpdate::default().question("What is X?".to_string()))
        .await
        .unwrap();
    assert!(state.documents.is_empty());
    assert!(state.generation.is_none());
    assert_eq!(generations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_grounded_on_third_attempt() {
    let generations = Arc::new(AtomicUsize::new(0));
    let corpus = vec![Document::new("X is a letter"), Document::new("unrelated")];
    let graph = rag_graph(corpus, vec![false, false, true], Arc::clone(&generations));
    let state = graph
        .compile()
        .unwrap()
        .invoke(RagUpdate::default().question("X".to_string()))
        .await
        .unwrap();
    assert_eq!(generations.load(Ordering::SeqCst), 3);
    assert_eq!(state.attempts, 3);
    assert_eq!(state.generation.as_deref(), Some("draft 3"));
    assert_eq!(state.documents, vec![Document::new("X is a letter")]);
}

#[tokio::test]
async fn test_never_grounded_fails_after_budget() {
    let generations = Arc::new(AtomicUsize::new(0));
    let graph = rag_graph(vec![Document::new("X")], vec![], Arc::clone(&generations));
    let err = graph
        .compile()
        .unwrap()
        .invoke(RagUpdate::default().question("X".to_string()))
        .await
        .unwrap_err();
    assert_eq!(generations.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    assert!(matches!(err, GraphError::RetryExhausted { attempts: 3, .. }));
}
