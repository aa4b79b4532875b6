//! Shared fixtures for the end-to-end scenario tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use weft::{
    build_engine_with, CoreConfig, Engine, ExecutionContext, MockLlm, TenancyMode,
};

/// The canonical two-phase drafting playbook used across scenarios.
pub const CONTENT_DRAFTING: &str = r#"---
code: content_drafting
version: "1.0.0"
kind: workflow
scope: system
required_tools: []
required_capabilities: [standard]
locale: en
tags: [content]
---
# Content drafting

Draft the weekly content plan from the workspace's recent focus.

```json
{
  "steps": [
    {
      "id": "analyze",
      "kind": "llm_call",
      "prompt": "Summarize the focus: {{inputs.focus}}",
      "output_schema": {"required": {"summary": "string"}},
      "profile": "fast"
    },
    {
      "id": "draft",
      "kind": "llm_call",
      "prompt": "Draft a content plan for: {{analyze.summary}}",
      "output_schema": {"required": {"plan": "string"}},
      "depends_on": ["analyze"]
    },
    {
      "id": "emit",
      "kind": "artifact_emit",
      "path": "artifacts/content_plan.md",
      "content_from": "draft.plan",
      "depends_on": ["draft"]
    }
  ]
}
```
"#;

pub fn write_playbook(dir: &Path, name: &str, text: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(format!("{name}.md")), text).unwrap();
}

/// Engine over in-memory stores with a scripted LLM.
pub fn engine(root: &Path, llm: MockLlm) -> Engine {
    let mut config = CoreConfig::ephemeral(root.join("sandboxes"));
    let playbooks = root.join("playbooks");
    if playbooks.exists() {
        config.playbooks_dir = Some(playbooks);
    }
    build_engine_with(config, Some(Arc::new(llm)), None).unwrap()
}

/// Engine over a sqlite file, for restart scenarios.
pub fn engine_sqlite(root: &Path, llm: MockLlm) -> Engine {
    let mut config = CoreConfig::ephemeral(root.join("sandboxes"));
    config.db_path = Some(root.join("weft.db3"));
    let playbooks = root.join("playbooks");
    if playbooks.exists() {
        config.playbooks_dir = Some(playbooks);
    }
    build_engine_with(config, Some(Arc::new(llm)), None).unwrap()
}

pub fn ctx() -> ExecutionContext {
    ExecutionContext::new("local", "ws-1", TenancyMode::Local).with_project_id("proj-1")
}

pub async fn ensure_workspace(engine: &Engine) {
    engine.ensure_workspace("ws-1", "Demo workspace").await.unwrap();
}
