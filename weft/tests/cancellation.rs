//! Cancellation during a tool call: terminal within the timeout window, no
//! artifact, ordered events.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ctx;
use serde_json::json;
use weft::{
    parse_playbook, CapabilityRouter, DangerLevel, EventFilter, ExecutorService, InMemoryEventLog,
    LocalArtifactStore, LocalTool, MockLlm, MockResponse, MockTool, PlaybookExecutorPort,
    PlaybookLibrary, PlaybookLoader, ProviderKind, RawToolCall, RouterConfig, RuntimeDefaults,
    SandboxLayout, SessionStatus, StoreSet, ToolConnection, ToolDispatcher, Workspace,
};

const SYNC_AND_EMIT: &str = r#"---
code: sync_and_emit
version: "1.0.0"
kind: workflow
scope: system
required_tools: [syncer]
required_capabilities: [tool_strict]
---
Sync the remote source, then emit a report.

```json
{
  "steps": [
    {
      "id": "sync",
      "kind": "tool_call",
      "tool_type": "syncer",
      "prompt": "Sync everything now",
      "writes": false
    },
    {
      "id": "emit",
      "kind": "artifact_emit",
      "path": "artifacts/report.md",
      "content_from": "sync.results",
      "depends_on": ["sync"]
    }
  ]
}
```
"#;

#[tokio::test]
async fn cancel_during_tool_call_reaches_cancelled_quickly() {
    let dir = tempfile::tempdir().unwrap();
    let stores = StoreSet::in_memory();
    let log = Arc::new(InMemoryEventLog::new());

    // The tool hangs far longer than the test budget; cancellation must not
    // wait it out.
    let slow_tool = Arc::new(MockTool::new("syncer").with_delay(Duration::from_secs(120)));
    let llm = MockLlm::new().on_contains(
        "Sync everything now",
        MockResponse::text("syncing").with_tool_calls(vec![RawToolCall {
            name: "syncer.pull".to_string(),
            args: json!({}),
        }]),
    );
    let mut library = PlaybookLibrary::new();
    library.register(parse_playbook(SYNC_AND_EMIT).unwrap());
    let layout = SandboxLayout::new(dir.path().join("sandboxes"));
    let executor = ExecutorService::new(
        stores.clone(),
        log.clone(),
        Arc::new(llm),
        Arc::new(CapabilityRouter::new(
            RouterConfig::local_default(),
            [ProviderKind::Mock],
        )),
        Arc::new(ToolDispatcher::new(
            [slow_tool.clone() as Arc<dyn LocalTool>],
            None,
        )),
        Arc::new(LocalArtifactStore::new(layout, stores.artifacts.clone())),
        Arc::new(PlaybookLoader::new(library)),
        RuntimeDefaults::default(),
    );
    stores
        .workspaces
        .create(&Workspace::new("ws-1", "Demo", "local"))
        .await
        .unwrap();
    stores
        .connections
        .upsert(&ToolConnection::local("ws-1", "syncer", DangerLevel::Low))
        .await
        .unwrap();

    let execution_id = executor
        .start(&ctx(), "sync_and_emit", None, json!({}))
        .await
        .unwrap();

    // Wait for the tool to actually be invoked, then cancel mid-call.
    loop {
        if slow_tool.invocation_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    executor.cancel(&execution_id).await.unwrap();

    let session = tokio::time::timeout(
        Duration::from_secs(10),
        executor.wait(&execution_id),
    )
    .await
    .expect("cancellation must land well within one tool timeout window")
    .unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);

    // No artifact was registered.
    assert!(stores
        .artifacts
        .list_by_session("ws-1", &execution_id)
        .await
        .unwrap()
        .is_empty());

    // The cancelled event lands after the tool_invoked event in session order.
    let events = log
        .range(
            "ws-1",
            EventFilter {
                session_id: Some(execution_id.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let seq_of = |kind: &str| {
        events
            .iter()
            .find(|e| e.kind == kind)
            .and_then(|e| e.seq)
            .unwrap_or_else(|| panic!("missing {kind} event"))
    };
    assert!(seq_of("cancelled") > seq_of("tool_invoked"));

    // A second cancel against the now-terminal session is a no-op.
    executor.cancel(&execution_id).await.unwrap();
    let (session, _) = executor.status(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
}

/// A cancel delivered after a session completed leaves it completed.
#[tokio::test]
async fn cancel_after_completion_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let stores = StoreSet::in_memory();
    let log = Arc::new(InMemoryEventLog::new());
    let tool = Arc::new(MockTool::new("syncer").with_result(json!({"synced": 3})));
    let llm = MockLlm::new().on_contains(
        "Sync everything now",
        MockResponse::text("syncing").with_tool_calls(vec![RawToolCall {
            name: "syncer.pull".to_string(),
            args: json!({}),
        }]),
    );
    let mut library = PlaybookLibrary::new();
    library.register(parse_playbook(SYNC_AND_EMIT).unwrap());
    let layout = SandboxLayout::new(dir.path().join("sandboxes"));
    let executor = ExecutorService::new(
        stores.clone(),
        log.clone(),
        Arc::new(llm),
        Arc::new(CapabilityRouter::new(
            RouterConfig::local_default(),
            [ProviderKind::Mock],
        )),
        Arc::new(ToolDispatcher::new([tool as Arc<dyn LocalTool>], None)),
        Arc::new(LocalArtifactStore::new(layout, stores.artifacts.clone())),
        Arc::new(PlaybookLoader::new(library)),
        RuntimeDefaults::default(),
    );
    stores
        .workspaces
        .create(&Workspace::new("ws-1", "Demo", "local"))
        .await
        .unwrap();
    stores
        .connections
        .upsert(&ToolConnection::local("ws-1", "syncer", DangerLevel::Low))
        .await
        .unwrap();

    let execution_id = executor
        .start(&ctx(), "sync_and_emit", None, json!({}))
        .await
        .unwrap();
    let session = executor.wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    executor.cancel(&execution_id).await.unwrap();
    let (session, _) = executor.status(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}
