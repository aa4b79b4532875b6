//! Per-request execution context.
//!
//! Created at the request boundary by the identity port, carried by value
//! through every pipeline, and dropped when the request completes. Immutable
//! once built: there is no mutating API, only `with_*` constructors consumed
//! before first use.
//!
//! Core code never branches on `mode`; only adapters consult it (e.g. the
//! remote tool client stamps it into tracing fields).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenancy mode of the adapter set serving this request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenancyMode {
    Local,
    Remote,
}

/// Immutable per-request envelope: who is acting, in which workspace, under
/// which adapter set.
///
/// **Interaction**: produced by `IdentityPort::resolve`; read by stores (scoping),
/// tool dispatch (tracing + role gate), and the runtime (session attribution).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionContext {
    actor_id: String,
    workspace_id: String,
    mode: TenancyMode,
    request_id: String,
    tenant_tag: Option<String>,
    project_id: Option<String>,
    locale: Option<String>,
}

impl ExecutionContext {
    /// Builds a context with a fresh request id. Optional fields default to `None`.
    pub fn new(
        actor_id: impl Into<String>,
        workspace_id: impl Into<String>,
        mode: TenancyMode,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            workspace_id: workspace_id.into(),
            mode,
            request_id: Uuid::new_v4().to_string(),
            tenant_tag: None,
            project_id: None,
            locale: None,
        }
    }

    pub fn with_tenant_tag(mut self, tag: impl Into<String>) -> Self {
        self.tenant_tag = Some(tag.into());
        self
    }

    pub fn with_project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Derives a context for a nested run (sub-playbook): same actor, workspace,
    /// mode, and tags, but a fresh request id.
    pub fn child(&self) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Tenancy mode. Adapter-only: core pipelines must not branch on this.
    pub fn mode(&self) -> TenancyMode {
        self.mode
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn tenant_tag(&self) -> Option<&str> {
        self.tenant_tag.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_assigns_fresh_request_id() {
        let a = ExecutionContext::new("u-1", "ws-1", TenancyMode::Local);
        let b = ExecutionContext::new("u-1", "ws-1", TenancyMode::Local);
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn child_keeps_scope_but_renews_request_id() {
        let parent = ExecutionContext::new("u-1", "ws-1", TenancyMode::Local)
            .with_project_id("proj-1")
            .with_locale("ja-JP");
        let child = parent.child();
        assert_eq!(child.workspace_id(), "ws-1");
        assert_eq!(child.project_id(), Some("proj-1"));
        assert_eq!(child.locale(), Some("ja-JP"));
        assert_ne!(child.request_id(), parent.request_id());
    }
}
