//! Full playbook run: decision, execution, artifact, cost.

mod common;

use common::{ctx, engine, ensure_workspace, write_playbook, CONTENT_DRAFTING};
use serde_json::json;
use weft::{Decision, MockLlm, MockResponse, PlaybookExecutorPort, SessionStatus, StepState};

fn scripted_llm() -> MockLlm {
    MockLlm::new()
        .on_contains(
            "Mine the following input",
            MockResponse::json(json!({
                "signals": [{"text": "draft the weekly content plan", "confidence": 0.9}]
            })),
        )
        .on_contains(
            "Classify the user's utterance",
            MockResponse::json(json!({"interaction": "execute"})),
        )
        .on_contains(
            "task domains",
            MockResponse::json(json!({"tags": ["content"]})),
        )
        .on_contains(
            "Rank the candidate playbooks",
            MockResponse::json(json!({
                "ranking": [{"code": "content_drafting", "score": 0.92,
                             "inputs": {"focus": "this week"}}]
            })),
        )
        .on_contains(
            "Summarize the focus",
            MockResponse::json(json!({"summary": "launch announcements"})),
        )
        .on_contains(
            "Draft a content plan",
            MockResponse::json(json!({"plan": "# Content plan\n- Monday: launch post"})),
        )
        .on_contains(
            "You govern a workspace's intent surface",
            MockResponse::json(json!({"ops": []})),
        )
}

/// "please draft this week's content plan" starts content_drafting, the
/// session runs pending → running → completed, the artifact lands at
/// artifacts/content_plan.md, and accrued cost stays under the standard cap.
#[tokio::test]
async fn drafting_request_runs_playbook_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    write_playbook(&dir.path().join("playbooks"), "content_drafting", CONTENT_DRAFTING);
    let engine = engine(dir.path(), scripted_llm());
    ensure_workspace(&engine).await;

    let reply = engine
        .handle_message(&ctx(), "please draft this week's content plan")
        .await
        .unwrap();
    let execution_id = reply.execution_id.expect("session started");
    match &reply.decision {
        Decision::StartPlaybook { playbook_code, .. } => {
            assert_eq!(playbook_code, "content_drafting")
        }
        other => panic!("expected StartPlaybook, got {other:?}"),
    }

    let session = engine.executor().wait(&execution_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // Every step succeeded in order, and outputs flowed between them.
    let (_, steps) = engine.executor().status(&execution_id).await.unwrap();
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.state == StepState::Succeeded));
    assert_eq!(
        steps[1].inputs_ir["analyze"]["summary"],
        "launch announcements"
    );

    // The artifact is registered and on disk under the project sandbox.
    let artifacts = engine
        .stores()
        .artifacts
        .list_by_session("ws-1", &execution_id)
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].path, "artifacts/content_plan.md");
    let on_disk = dir
        .path()
        .join("sandboxes")
        .join("ws-1")
        .join("proj-1")
        .join("artifacts/content_plan.md");
    assert!(on_disk.exists());
    assert!(std::fs::read_to_string(on_disk)
        .unwrap()
        .contains("Monday: launch post"));

    // Standard-profile spend stays under its session budget.
    assert!(session.cost.accrued("standard") <= 2.0);
}
