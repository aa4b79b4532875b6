//! Tool dispatcher: the single gate every tool call passes through.
//!
//! Check order: role gate, readonly gate, idempotency cache, then dispatch to
//! the local adapter or the remote client by `connection.connection_type`. A
//! refused call never reaches the adapter, so no outbound request is made.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::domain::{ConnectionType, ToolConnection};
use crate::error::CoreError;
use crate::ports::{LocalTool, ToolResult};

use super::RemoteToolClient;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Derives the at-most-once key for a tool side effect:
/// `(session_id, step_id, args_hash)`.
pub fn idempotency_key(session_id: &str, step_id: &str, args: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    step_id.hash(&mut hasher);
    // Canonical form: serde_json string keeps object key order stable per value.
    args.to_string().hash(&mut hasher);
    format!("{session_id}:{step_id}:{:016x}", hasher.finish())
}

/// Uniform invocation for local and remote tools.
pub struct ToolDispatcher {
    locals: HashMap<String, Arc<dyn LocalTool>>,
    remote: Option<Arc<RemoteToolClient>>,
    completed: DashMap<String, ToolResult>,
    tool_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(
        locals: impl IntoIterator<Item = Arc<dyn LocalTool>>,
        remote: Option<Arc<RemoteToolClient>>,
    ) -> Self {
        Self {
            locals: locals
                .into_iter()
                .map(|t| (t.tool_type().to_string(), t))
                .collect(),
            remote,
            completed: DashMap::new(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Whether a tool type can be dispatched with the current adapters.
    pub fn supports(&self, connection: &ToolConnection) -> bool {
        match connection.connection_type {
            ConnectionType::Local => self.locals.contains_key(&connection.tool_type),
            ConnectionType::Remote => self.remote.is_some(),
        }
    }

    /// Invokes one tool action through the connection, honoring gating and the
    /// idempotency key.
    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        connection: &ToolConnection,
        action: &str,
        args: &Value,
        ctx: &ExecutionContext,
        execution_id: Option<&str>,
        writes: bool,
        idempotency_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, CoreError> {
        // Role gate first: a caller outside allowed_roles never dispatches.
        if !connection.allowed_roles.is_empty()
            && !connection
                .allowed_roles
                .iter()
                .any(|r| r == ctx.actor_id())
        {
            return Err(CoreError::PermissionDenied {
                action: format!("{}.{action}", connection.tool_type),
                message: format!("actor {} is not an allowed role", ctx.actor_id()),
            });
        }

        // Write on a readonly connection is refused without dispatch.
        let local_writes = self
            .locals
            .get(&connection.tool_type)
            .map(|t| t.writes(action))
            .unwrap_or(false);
        if (writes || local_writes) && connection.default_readonly {
            return Err(CoreError::PermissionDenied {
                action: format!("{}.{action}", connection.tool_type),
                message: "write-classified call on a readonly connection".to_string(),
            });
        }

        if let Some(key) = idempotency_key {
            if let Some(cached) = self.completed.get(key) {
                debug!(key, "tool invocation served from idempotency cache");
                return Ok(cached.clone());
            }
        }

        let result = match connection.connection_type {
            ConnectionType::Local => {
                let tool = self.locals.get(&connection.tool_type).ok_or_else(|| {
                    CoreError::ProviderUnavailable {
                        provider: connection.tool_type.clone(),
                        message: "no local adapter registered for tool type".to_string(),
                    }
                })?;
                let fut = tool.invoke(action, args, ctx);
                tokio::select! {
                    r = tokio::time::timeout(self.tool_timeout, fut) => match r {
                        Ok(inner) => inner?,
                        Err(_) => {
                            return Err(CoreError::StepTimeout {
                                step_id: format!("{}.{action}", connection.tool_type),
                                timeout_ms: self.tool_timeout.as_millis() as u64,
                            })
                        }
                    },
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                }
            }
            ConnectionType::Remote => {
                let remote = self.remote.as_ref().ok_or_else(|| {
                    CoreError::ProviderUnavailable {
                        provider: connection.tool_type.clone(),
                        message: "remote tool dispatch is not configured".to_string(),
                    }
                })?;
                remote
                    .invoke(
                        &connection.tool_type,
                        action,
                        args,
                        ctx,
                        execution_id,
                        self.tool_timeout,
                        cancel,
                    )
                    .await?
            }
        };

        // Cache after the side effect happened, success or application error:
        // a retry with the same key must not re-run the effect.
        if let Some(key) = idempotency_key {
            self.completed.insert(key.to_string(), result.clone());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenancyMode;
    use crate::domain::DangerLevel;
    use crate::tools::MockTool;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u-1", "ws-1", TenancyMode::Local)
    }

    fn dispatcher_with(tool: Arc<MockTool>) -> ToolDispatcher {
        ToolDispatcher::new([tool as Arc<dyn LocalTool>], None)
    }

    #[test]
    fn idempotency_key_is_stable_and_args_sensitive() {
        let a = idempotency_key("sess", "step", &json!({"x": 1}));
        let b = idempotency_key("sess", "step", &json!({"x": 1}));
        let c = idempotency_key("sess", "step", &json!({"x": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    /// **Scenario**: a write-classified call on a readonly connection is refused
    /// with permission_denied and the adapter is never reached.
    #[tokio::test]
    async fn readonly_gate_refuses_before_dispatch() {
        let tool = Arc::new(MockTool::new("publisher").with_result(json!({"ok": true})));
        let dispatcher = dispatcher_with(tool.clone());
        let conn = ToolConnection::local("ws-1", "publisher", DangerLevel::Medium).readonly();
        let err = dispatcher
            .invoke(
                &conn,
                "publish",
                &json!({}),
                &ctx(),
                None,
                true,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission_denied");
        assert_eq!(tool.invocation_count(), 0);
    }

    #[tokio::test]
    async fn role_gate_checks_actor() {
        let tool = Arc::new(MockTool::new("publisher"));
        let dispatcher = dispatcher_with(tool.clone());
        let mut conn = ToolConnection::local("ws-1", "publisher", DangerLevel::Low);
        conn.allowed_roles = vec!["someone-else".to_string()];
        let err = dispatcher
            .invoke(
                &conn,
                "list",
                &json!({}),
                &ctx(),
                None,
                false,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission_denied");
        assert_eq!(tool.invocation_count(), 0);
    }

    /// **Scenario**: two invocations with the same idempotency key yield exactly
    /// one tool side effect.
    #[tokio::test]
    async fn idempotent_invocations_run_once() {
        let tool = Arc::new(MockTool::new("publisher").with_result(json!({"post_id": 7})));
        let dispatcher = dispatcher_with(tool.clone());
        let conn = ToolConnection::local("ws-1", "publisher", DangerLevel::Low);
        let key = idempotency_key("sess-1", "step-1", &json!({"title": "hello"}));
        for _ in 0..2 {
            let out = dispatcher
                .invoke(
                    &conn,
                    "publish",
                    &json!({"title": "hello"}),
                    &ctx(),
                    Some("sess-1"),
                    false,
                    Some(&key),
                    &CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(out.result["post_id"], 7);
        }
        assert_eq!(tool.invocation_count(), 1);
    }
}
