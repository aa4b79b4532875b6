//! Router assembly and shared state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use weft::{Engine, IdentityPort};

use crate::handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub identity: Arc<dyn IdentityPort>,
}

impl AppState {
    pub fn new(engine: Engine, identity: Arc<dyn IdentityPort>) -> Self {
        Self {
            engine: Arc::new(engine),
            identity,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/v1/workspaces/:workspace_id/messages",
            post(handlers::post_message),
        )
        .route(
            "/v1/workspaces/:workspace_id/playbooks/:code/run",
            post(handlers::run_playbook),
        )
        .route(
            "/v1/workspaces/:workspace_id/timeline",
            get(handlers::timeline),
        )
        .route(
            "/v1/workspaces/:workspace_id/clusters/rebuild",
            post(handlers::rebuild_clusters),
        )
        .route("/v1/executions/:execution_id", get(handlers::execution_status))
        .route(
            "/v1/executions/:execution_id/pause",
            post(handlers::pause_execution),
        )
        .route(
            "/v1/executions/:execution_id/resume",
            post(handlers::resume_execution),
        )
        .route(
            "/v1/executions/:execution_id/cancel",
            post(handlers::cancel_execution),
        )
        .with_state(state)
}
