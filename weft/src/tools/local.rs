//! Built-in local tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::CoreError;
use crate::ports::{LocalTool, ToolResult};
use crate::sandbox::SandboxLayout;

/// Current time; the smallest useful read-only tool.
pub struct ClockTool;

#[async_trait]
impl LocalTool for ClockTool {
    fn tool_type(&self) -> &str {
        "clock"
    }

    fn writes(&self, _action: &str) -> bool {
        false
    }

    async fn invoke(
        &self,
        action: &str,
        _args: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolResult, CoreError> {
        match action {
            "now" => Ok(ToolResult::ok(json!({
                "now": Utc::now().to_rfc3339(),
            }))),
            other => Ok(ToolResult::failed(
                "unknown_action",
                format!("clock has no action `{other}`"),
            )),
        }
    }
}

/// Read/list/write access to the project sandbox.
///
/// `write` is write-classified; dispatch gates it against readonly
/// connections. All paths resolve through the sandbox, so traversal attempts
/// surface as `sandbox_denied`.
pub struct SandboxFilesTool {
    layout: SandboxLayout,
}

impl SandboxFilesTool {
    pub fn new(layout: SandboxLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl LocalTool for SandboxFilesTool {
    fn tool_type(&self) -> &str {
        "workspace_files"
    }

    fn writes(&self, action: &str) -> bool {
        action == "write"
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, CoreError> {
        let sandbox = self.layout.sandbox_for(ctx)?;
        match action {
            "list" => {
                let mut files = Vec::new();
                for entry in walkdir::WalkDir::new(sandbox.root())
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|e| e.file_type().is_file())
                {
                    if let Ok(rel) = entry.path().strip_prefix(sandbox.root()) {
                        files.push(rel.to_string_lossy().to_string());
                    }
                }
                files.sort();
                Ok(ToolResult::ok(json!({ "files": files })))
            }
            "read" => {
                let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
                    return Ok(ToolResult::failed("bad_args", "`path` is required"));
                };
                let resolved = sandbox.resolve(path)?;
                match tokio::fs::read_to_string(&resolved).await {
                    Ok(content) => Ok(ToolResult::ok(json!({ "content": content }))),
                    Err(e) => Ok(ToolResult::failed("read_failed", e.to_string())),
                }
            }
            "write" => {
                let (Some(path), Some(content)) = (
                    args.get("path").and_then(|v| v.as_str()),
                    args.get("content").and_then(|v| v.as_str()),
                ) else {
                    return Ok(ToolResult::failed(
                        "bad_args",
                        "`path` and `content` are required",
                    ));
                };
                let written = sandbox.write_atomic(path, content.as_bytes()).await?;
                Ok(ToolResult::ok(json!({
                    "path": path,
                    "bytes": written.metadata().map(|m| m.len()).unwrap_or(0),
                })))
            }
            other => Ok(ToolResult::failed(
                "unknown_action",
                format!("workspace_files has no action `{other}`"),
            )),
        }
    }
}

/// Scriptable tool for tests: counts invocations, returns a fixed result, and
/// can classify chosen actions as writes.
pub struct MockTool {
    tool_type: String,
    result: RwLock<Value>,
    write_actions: RwLock<Vec<String>>,
    delay: RwLock<Option<std::time::Duration>>,
    invocations: AtomicUsize,
}

impl MockTool {
    pub fn new(tool_type: impl Into<String>) -> Self {
        Self {
            tool_type: tool_type.into(),
            result: RwLock::new(json!({})),
            write_actions: RwLock::new(Vec::new()),
            delay: RwLock::new(None),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Delay before answering, for cancellation and timeout tests.
    pub fn with_delay(self, delay: std::time::Duration) -> Self {
        *self.delay.write().expect("mock tool lock") = Some(delay);
        self
    }

    pub fn with_result(self, result: Value) -> Self {
        *self.result.write().expect("mock tool lock") = result;
        self
    }

    pub fn with_write_action(self, action: impl Into<String>) -> Self {
        self.write_actions
            .write()
            .expect("mock tool lock")
            .push(action.into());
        self
    }

    /// Number of times `invoke` actually ran (idempotency-cache hits excluded).
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalTool for MockTool {
    fn tool_type(&self) -> &str {
        &self.tool_type
    }

    fn writes(&self, action: &str) -> bool {
        self.write_actions
            .read()
            .expect("mock tool lock")
            .iter()
            .any(|a| a == action)
    }

    async fn invoke(
        &self,
        _action: &str,
        _args: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolResult, CoreError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.read().expect("mock tool lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolResult::ok(self.result.read().expect("mock tool lock").clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenancyMode;

    #[tokio::test]
    async fn sandbox_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SandboxFilesTool::new(SandboxLayout::new(dir.path()));
        let ctx = ExecutionContext::new("u-1", "ws-1", TenancyMode::Local).with_project_id("p-1");

        let write = tool
            .invoke(
                "write",
                &json!({"path": "notes/a.md", "content": "hello"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(write.success);

        let read = tool
            .invoke("read", &json!({"path": "notes/a.md"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read.result["content"], "hello");

        let list = tool.invoke("list", &json!({}), &ctx).await.unwrap();
        assert_eq!(list.result["files"][0], "notes/a.md");
    }

    #[tokio::test]
    async fn sandbox_files_denies_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SandboxFilesTool::new(SandboxLayout::new(dir.path()));
        let ctx = ExecutionContext::new("u-1", "ws-1", TenancyMode::Local);
        let err = tool
            .invoke("read", &json!({"path": "../secret"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "sandbox_denied");
    }

    #[test]
    fn write_classification() {
        let tool = SandboxFilesTool::new(SandboxLayout::new("/tmp/x"));
        assert!(tool.writes("write"));
        assert!(!tool.writes("read"));
        assert!(!tool.writes("list"));
    }
}
