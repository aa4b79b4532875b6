//! Q&A routing: a question answers inline and starts nothing.

mod common;

use common::{ctx, engine, ensure_workspace};
use serde_json::json;
use weft::{Decision, EventFilter, MockLlm, MockResponse};

/// A plain question in a workspace with no pinned playbook routes to Q&A:
/// no session is created, exactly one chat_completed event lands, and the
/// low-confidence signal is never promoted to a card.
#[tokio::test]
async fn question_routes_to_qa_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let llm = MockLlm::new()
        .on_contains(
            "Mine the following input",
            MockResponse::json(json!({
                "signals": [{"text": "learn about the product", "confidence": 0.3}]
            })),
        )
        .on_contains(
            "Classify the user's utterance",
            MockResponse::json(json!({"interaction": "qa"})),
        )
        .on_contains(
            "what is mindscape?",
            MockResponse::text("A local-first workspace engine."),
        );
    let engine = engine(dir.path(), llm);
    ensure_workspace(&engine).await;

    let reply = engine
        .handle_message(&ctx(), "what is mindscape?")
        .await
        .unwrap();

    assert_eq!(reply.decision, Decision::Qa);
    assert_eq!(reply.execution_id, None);
    assert_eq!(
        reply.reply.as_deref(),
        Some("A local-first workspace engine.")
    );

    // No session created.
    assert!(engine
        .stores()
        .executions
        .list_sessions("ws-1")
        .await
        .unwrap()
        .is_empty());

    // Exactly one chat_completed event.
    let completed = engine
        .events()
        .range(
            "ws-1",
            EventFilter {
                kind: Some("chat_completed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);

    // Confidence 0.3 sits under the 0.5 default: dismissed, never a card.
    assert!(engine.stores().cards.list("ws-1").await.unwrap().is_empty());
}
