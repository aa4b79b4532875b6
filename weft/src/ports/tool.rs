//! Tool port: local adapter trait and the uniform result shape.
//!
//! Dispatch (gating, retries, idempotency, local-vs-remote selection) lives in
//! `tools::dispatch`; this module defines what an individual local tool
//! implements and what every invocation returns.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::CoreError;

/// Uniform result of one tool invocation, local or remote.
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub success: bool,
    pub result: Value,
    /// Stable error code when `success` is false (e.g. the remote `error.code`).
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ToolResult {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// A tool executable in-process by the local adapter set.
///
/// `writes` classifies an action for danger gating; dispatch refuses
/// write-classified actions on readonly connections before calling `invoke`.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Tool type this adapter serves (matches `ToolConnection::tool_type`).
    fn tool_type(&self) -> &str;

    /// Whether the given action is write-classified.
    fn writes(&self, action: &str) -> bool;

    async fn invoke(
        &self,
        action: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, CoreError>;
}
