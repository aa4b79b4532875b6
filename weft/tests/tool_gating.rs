//! Danger gating: a write-classified step on a readonly connection is refused
//! before any dispatch happens.

mod common;

use common::{ctx, engine, ensure_workspace, write_playbook};
use serde_json::json;
use weft::{
    DangerLevel, EventFilter, MockLlm, MockResponse, PlaybookExecutorPort, RawToolCall,
    SessionStatus, ToolConnection,
};

const PUBLISH_PLAYBOOK: &str = r#"---
code: publish_update
version: "1.0.0"
kind: workflow
scope: system
required_tools: [publisher]
required_capabilities: [tool_strict]
---
Publish the latest update through the connected publisher.

```json
{
  "steps": [
    {
      "id": "publish",
      "kind": "tool_call",
      "tool_type": "publisher",
      "prompt": "Publish the update titled {{inputs.title}}",
      "writes": true
    }
  ]
}
```
"#;

#[tokio::test]
async fn write_step_on_readonly_connection_fails_without_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    write_playbook(&dir.path().join("playbooks"), "publish_update", PUBLISH_PLAYBOOK);
    let llm = MockLlm::new().on_contains(
        "Publish the update",
        MockResponse::text("publishing").with_tool_calls(vec![RawToolCall {
            name: "publisher.publish".to_string(),
            args: json!({"title": "Launch"}),
        }]),
    );
    let engine = engine(dir.path(), llm);
    ensure_workspace(&engine).await;

    // Medium danger (no approval gate), readonly: the write must be refused.
    let connection =
        ToolConnection::local("ws-1", "publisher", DangerLevel::Medium).readonly();
    engine.stores().connections.upsert(&connection).await.unwrap();

    let execution_id = engine
        .executor()
        .start(&ctx(), "publish_update", None, json!({"title": "Launch"}))
        .await
        .unwrap();
    let session = engine.executor().wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);

    // The session-fatal error carries the stable permission_denied code.
    let errors = engine
        .events()
        .range(
            "ws-1",
            EventFilter {
                session_id: Some(execution_id.clone()),
                kind: Some("session_error".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["code"], "permission_denied");

    // Refused before dispatch: the invocation never completed against any
    // adapter (no tool_completed event for the session).
    let completed = engine
        .events()
        .range(
            "ws-1",
            EventFilter {
                session_id: Some(execution_id),
                kind: Some("tool_completed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(completed.is_empty());
}
