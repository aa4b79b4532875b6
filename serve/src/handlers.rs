//! Request handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use weft::{Decision, EventFilter, PlaybookExecutorPort};

use crate::app::AppState;
use crate::response::ApiError;

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
pub struct MessageBody {
    pub text: String,
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<Json<Value>, ApiError> {
    let ctx = state
        .identity
        .resolve(body.token.as_deref().unwrap_or_default(), &workspace_id)
        .await?;
    state.engine.ensure_workspace(&workspace_id, &workspace_id).await?;
    let reply = state.engine.handle_message(&ctx, &body.text).await?;
    let started = matches!(reply.decision, Decision::StartPlaybook { .. });
    Ok(Json(json!({
        "decision": reply.decision,
        "reply": reply.reply,
        "execution_id": reply.execution_id,
        "started_playbook": started,
    })))
}

#[derive(Deserialize)]
pub struct RunBody {
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn run_playbook(
    State(state): State<AppState>,
    Path((workspace_id, code)): Path<(String, String)>,
    Json(body): Json<RunBody>,
) -> Result<Json<Value>, ApiError> {
    let ctx = state
        .identity
        .resolve(body.token.as_deref().unwrap_or_default(), &workspace_id)
        .await?;
    state.engine.ensure_workspace(&workspace_id, &workspace_id).await?;
    let execution_id = state
        .engine
        .executor()
        .start(&ctx, &code, body.variant_id.as_deref(), body.inputs)
        .await?;
    Ok(Json(json!({ "execution_id": execution_id })))
}

#[derive(Deserialize)]
pub struct TimelineQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn timeline(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = state
        .engine
        .events()
        .range(
            &workspace_id,
            EventFilter {
                session_id: query.session_id,
                kind: query.kind,
                since: None,
                limit: query.limit,
            },
        )
        .await?;
    // Envelope-stamped wire events, not storage rows.
    let events: Vec<Value> = events.iter().map(weft::events::to_wire).collect();
    Ok(Json(json!({ "events": events })))
}

/// On-demand intent clustering rebuild (also run nightly by operators).
pub async fn rebuild_clusters(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let clusters = state.engine.clusterer().cluster(&workspace_id).await?;
    Ok(Json(json!({ "clusters": clusters })))
}

pub async fn execution_status(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (session, steps) = state.engine.executor().status(&execution_id).await?;
    Ok(Json(json!({ "session": session, "steps": steps })))
}

pub async fn pause_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.executor().pause(&execution_id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize, Default)]
pub struct ResumeBody {
    #[serde(default)]
    pub token: Option<String>,
}

pub async fn resume_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    body: Option<Json<ResumeBody>>,
) -> Result<Json<Value>, ApiError> {
    let (session, _) = state.engine.executor().status(&execution_id).await?;
    let token = body.and_then(|b| b.0.token).unwrap_or_default();
    let ctx = state.identity.resolve(&token, &session.workspace_id).await?;
    state.engine.executor().resume(&ctx, &execution_id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.executor().cancel(&execution_id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft::{build_engine, CoreConfig, LocalIdentity};

    #[tokio::test]
    async fn router_builds_and_health_responds() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(CoreConfig::ephemeral(dir.path())).unwrap();
        let state = crate::AppState::new(engine, Arc::new(LocalIdentity));
        let router = crate::build_router(state);
        // Routing smoke check only; handler behavior is covered in weft.
        let _ = router;
        assert_eq!(healthz().await, "ok");
    }
}
