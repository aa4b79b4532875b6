//! Cost governance: a safe-write budget that cannot fit one standard-priced
//! call terminates the session with cost_cap_exceeded at that step.

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use common::ctx;
use serde_json::json;
use weft::{
    parse_playbook, CapabilityProfile, CapabilityRouter, ClockTool, EventFilter, ExecutorService,
    InMemoryEventLog, LocalArtifactStore, LocalTool, MockLlm, MockResponse, ModelEndpoint,
    PlaybookExecutorPort, PlaybookLibrary, PlaybookLoader, ProfileSpec, ProviderKind,
    RouterConfig, RuntimeDefaults, SandboxLayout, SessionStatus, StoreSet, ToolDispatcher,
    Workspace,
};

const SAFE_WRITE_PLAYBOOK: &str = r#"---
code: publish_review
version: "1.0.0"
kind: workflow
scope: system
required_tools: []
required_capabilities: [safe_write]
---
Review and finalize the outgoing copy.

```json
{
  "steps": [
    {
      "id": "review",
      "kind": "llm_call",
      "prompt": "Review the copy: {{inputs.copy}}",
      "output_schema": {"required": {"approved_copy": "string"}},
      "profile": "safe_write"
    }
  ]
}
```
"#;

/// Routing table with one standard-priced endpoint and a $0.0001 SAFE_WRITE
/// budget.
fn tight_router() -> CapabilityRouter {
    let all: BTreeSet<_> = [
        weft::ModelFeature::JsonOutput,
        weft::ModelFeature::StrictToolCalls,
        weft::ModelFeature::SafeWriteReview,
    ]
    .into_iter()
    .collect();
    let mut endpoints = BTreeMap::new();
    endpoints.insert(
        "mock-standard-priced".to_string(),
        ModelEndpoint {
            provider: ProviderKind::Mock,
            model: "mock".to_string(),
            cost_per_1k_tokens_usd: 0.0075,
            features: all.clone(),
        },
    );
    let mut profiles = BTreeMap::new();
    for profile in CapabilityProfile::all() {
        profiles.insert(
            profile,
            ProfileSpec {
                cost_ceiling_per_1k_usd: 0.02,
                required_features: all.clone(),
                fallback: vec!["mock-standard-priced".to_string()],
                session_budget_usd: if profile == CapabilityProfile::SafeWrite {
                    0.0001
                } else {
                    2.0
                },
            },
        );
    }
    CapabilityRouter::new(
        RouterConfig {
            endpoints,
            profiles,
            absolute_session_cap_usd: 10.0,
        },
        [ProviderKind::Mock],
    )
}

#[tokio::test]
async fn safe_write_budget_smaller_than_one_call_fails_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let stores = StoreSet::in_memory();
    let log = Arc::new(InMemoryEventLog::new());
    let llm = MockLlm::new().on_contains(
        "Review the copy",
        MockResponse::json(json!({"approved_copy": "done"})),
    );
    let mut library = PlaybookLibrary::new();
    library.register(parse_playbook(SAFE_WRITE_PLAYBOOK).unwrap());
    let layout = SandboxLayout::new(dir.path().join("sandboxes"));
    let executor = ExecutorService::new(
        stores.clone(),
        log.clone(),
        Arc::new(llm),
        Arc::new(tight_router()),
        Arc::new(ToolDispatcher::new(
            [Arc::new(ClockTool) as Arc<dyn LocalTool>],
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

    let execution_id = executor
        .start(&ctx(), "publish_review", None, json!({"copy": "hello"}))
        .await
        .unwrap();
    let session = executor.wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);

    let errors = log
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
    assert_eq!(errors[0].payload["code"], "cost_cap_exceeded");

    // Refused before the call: nothing was billed to the session.
    assert_eq!(session.cost.total_usd, 0.0);
}
