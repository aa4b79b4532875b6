//! Implicit pause: a high-danger write step waits for human approval, and
//! resuming counts as the approval.

mod common;

use std::sync::Arc;

use common::ctx;
use serde_json::json;
use weft::{
    parse_playbook, CapabilityRouter, DangerLevel, ExecutorService, InMemoryEventLog,
    LocalArtifactStore, LocalTool, MockLlm, MockResponse, MockTool, PauseReason,
    PlaybookExecutorPort, PlaybookLibrary, PlaybookLoader, ProviderKind, RawToolCall,
    RouterConfig, RuntimeDefaults, SandboxLayout, SessionStatus, StoreSet, ToolConnection,
    ToolDispatcher, Workspace,
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

fn executor_with(
    dir: &std::path::Path,
    stores: StoreSet,
    tool: Arc<MockTool>,
) -> ExecutorService {
    let llm = MockLlm::new().on_contains(
        "Publish the update",
        MockResponse::text("publishing").with_tool_calls(vec![RawToolCall {
            name: "publisher.publish".to_string(),
            args: json!({"title": "Launch"}),
        }]),
    );
    let mut library = PlaybookLibrary::new();
    library.register(parse_playbook(PUBLISH_PLAYBOOK).unwrap());
    let layout = SandboxLayout::new(dir.join("sandboxes"));
    ExecutorService::new(
        stores.clone(),
        Arc::new(InMemoryEventLog::new()),
        Arc::new(llm),
        Arc::new(CapabilityRouter::new(
            RouterConfig::local_default(),
            [ProviderKind::Mock],
        )),
        Arc::new(ToolDispatcher::new([tool as Arc<dyn LocalTool>], None)),
        Arc::new(LocalArtifactStore::new(layout, stores.artifacts.clone())),
        Arc::new(PlaybookLoader::new(library)),
        RuntimeDefaults::default(),
    )
}

#[tokio::test]
async fn high_danger_write_pauses_then_resume_approves() {
    let dir = tempfile::tempdir().unwrap();
    let stores = StoreSet::in_memory();
    let publisher = Arc::new(MockTool::new("publisher").with_result(json!({"post_id": 11})));
    let executor = executor_with(dir.path(), stores.clone(), publisher.clone());
    stores
        .workspaces
        .create(&Workspace::new("ws-1", "Demo", "local"))
        .await
        .unwrap();
    // Writable high-danger connection: dispatch is allowed, but only after an
    // approval.
    stores
        .connections
        .upsert(&ToolConnection::local("ws-1", "publisher", DangerLevel::High))
        .await
        .unwrap();

    let execution_id = executor
        .start(&ctx(), "publish_update", None, json!({"title": "Launch"}))
        .await
        .unwrap();
    let session = executor.wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert_eq!(
        session.paused_reason,
        Some(PauseReason::ApprovalRequired {
            step_id: "publish".to_string()
        })
    );

    // No dispatch happened while waiting for the human.
    assert_eq!(publisher.invocation_count(), 0);

    executor.resume(&ctx(), &execution_id).await.unwrap();
    let session = executor.wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    assert_eq!(publisher.invocation_count(), 1);
    let (_, steps) = executor.status(&execution_id).await.unwrap();
    assert_eq!(steps[0].tool_calls.len(), 1);
    assert_eq!(steps[0].tool_calls[0].action, "publish");
}
