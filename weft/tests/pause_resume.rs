//! Pause, process restart, resume: recorded outputs stay authoritative.

mod common;

use std::time::Duration;

use common::{ctx, engine_sqlite, ensure_workspace, write_playbook};
use serde_json::json;
use weft::{MockLlm, MockResponse, PlaybookExecutorPort, SessionStatus, StepState};

const TWO_STEP: &str = r#"---
code: two_step
version: "1.0.0"
kind: workflow
scope: system
required_tools: []
required_capabilities: [standard]
---
Analyze, then summarize.

```json
{
  "steps": [
    {
      "id": "analyze",
      "kind": "llm_call",
      "prompt": "Analyze the topic: {{inputs.topic}}",
      "output_schema": {"required": {"finding": "string"}}
    },
    {
      "id": "summarize",
      "kind": "llm_call",
      "prompt": "Summarize the finding: {{analyze.finding}}",
      "output_schema": {"required": {"summary": "string"}},
      "depends_on": ["analyze"]
    }
  ]
}
```
"#;

fn scripted_llm(analyze_delay: Duration) -> MockLlm {
    MockLlm::new()
        .on_contains(
            "Analyze the topic",
            MockResponse::json(json!({"finding": "adoption is growing"}))
                .with_delay(analyze_delay),
        )
        .on_contains(
            "Summarize the finding",
            MockResponse::json(json!({"summary": "growth continues"})),
        )
}

#[tokio::test]
async fn pause_survives_restart_and_resume_completes() {
    let dir = tempfile::tempdir().unwrap();
    write_playbook(&dir.path().join("playbooks"), "two_step", TWO_STEP);

    // First process: start, pause while step 1 is in flight.
    let execution_id = {
        let engine = engine_sqlite(dir.path(), scripted_llm(Duration::from_millis(800)));
        ensure_workspace(&engine).await;
        let execution_id = engine
            .executor()
            .start(&ctx(), "two_step", None, json!({"topic": "weft"}))
            .await
            .unwrap();

        // Wait until step 1 is actually running, then request the pause; it
        // takes effect at the next suspension point, after step 1 records its
        // outputs.
        loop {
            let (_, steps) = engine.executor().status(&execution_id).await.unwrap();
            if steps[0].state == StepState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        engine.executor().pause(&execution_id).await.unwrap();

        let session = engine.executor().wait(&execution_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.current_step_index, 1);

        let (_, steps) = engine.executor().status(&execution_id).await.unwrap();
        assert_eq!(steps[0].state, StepState::Succeeded);
        assert_eq!(steps[1].state, StepState::Pending);
        execution_id
    };

    // Second process over the same database: resume and finish.
    let engine = engine_sqlite(dir.path(), scripted_llm(Duration::ZERO));
    engine.executor().resume(&ctx(), &execution_id).await.unwrap();
    let session = engine.executor().wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // Step 2 ran against step 1's recorded outputs_ir.
    let (_, steps) = engine.executor().status(&execution_id).await.unwrap();
    assert_eq!(steps[1].state, StepState::Succeeded);
    assert_eq!(
        steps[1].inputs_ir["analyze"],
        steps[0].outputs_ir.clone().unwrap()
    );
    assert_eq!(steps[1].outputs_ir.as_ref().unwrap()["summary"], "growth continues");
}
