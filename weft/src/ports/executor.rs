//! Playbook executor port: run, pause, resume, cancel, status.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::domain::{ExecutionSession, StepRecord};
use crate::error::CoreError;

/// Drives playbook execution sessions.
///
/// `start` returns as soon as the session exists and its task is scheduled;
/// `wait` blocks until the session is terminal or paused (used by the
/// synchronous CLI path). Status is always served from the persisted session,
/// so a resumable UI survives process restarts.
#[async_trait]
pub trait PlaybookExecutorPort: Send + Sync {
    async fn start(
        &self,
        ctx: &ExecutionContext,
        playbook_code: &str,
        variant_id: Option<&str>,
        inputs: Value,
    ) -> Result<String, CoreError>;

    /// Awaits the session leaving the running states. Returns the final session.
    async fn wait(&self, execution_id: &str) -> Result<ExecutionSession, CoreError>;

    async fn pause(&self, execution_id: &str) -> Result<(), CoreError>;

    /// Continues a paused session from its persisted `current_step_index`.
    async fn resume(&self, ctx: &ExecutionContext, execution_id: &str) -> Result<(), CoreError>;

    async fn cancel(&self, execution_id: &str) -> Result<(), CoreError>;

    async fn status(
        &self,
        execution_id: &str,
    ) -> Result<(ExecutionSession, Vec<StepRecord>), CoreError>;
}
