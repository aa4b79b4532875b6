//! Core error taxonomy.
//!
//! Every failure that crosses a component boundary is one of these kinds; raw
//! provider, sqlite, and HTTP errors are mapped in at the adapter seam and never
//! escape as bare strings. Each kind carries a stable machine `code()` used in
//! timeline events, plus a `details()` map for diagnostics.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Core failure kinds.
///
/// Propagation policy:
/// - recovered locally: `ProviderUnavailable` (router failover), network tool
///   errors (bounded retry), `SignalExtractionFailed` (dropped to event log),
///   `PersistenceConflict` (retried once under the workspace lock);
/// - step-local: `SchemaViolation`, `ToolCallMalformed`, `StepTimeout` after
///   retries, `SandboxDenied`;
/// - session-fatal: `CostCapExceeded`, `Cancelled`, `PermissionDenied` on a
///   required step, `PlaybookUnusable`.
#[derive(Clone, Debug, Error)]
pub enum CoreError {
    /// No configured model endpoint can satisfy the request.
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// A JSON payload did not match its declared schema.
    #[error("schema violation at {location}: {message}")]
    SchemaViolation { location: String, message: String },

    /// The LLM produced tool calls that could not be parsed.
    #[error("malformed tool call: {message}")]
    ToolCallMalformed { message: String },

    /// A gated action was refused before dispatch.
    #[error("permission denied for {action}: {message}")]
    PermissionDenied { action: String, message: String },

    /// A step (or the session wall clock) exceeded its deadline.
    #[error("step {step_id} timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    /// A per-profile or absolute cost cap would be exceeded by the next billable call.
    #[error("cost cap exceeded for {scope}: accrued {accrued_usd} >= cap {cap_usd}")]
    CostCapExceeded {
        scope: String,
        cap_usd: f64,
        accrued_usd: f64,
    },

    /// A write attempted to escape the project sandbox.
    #[error("sandbox denied: {path}")]
    SandboxDenied { path: String },

    /// The session was cancelled at a cooperative point.
    #[error("cancelled")]
    Cancelled,

    /// Intent extraction failed; surfaced only on the event log.
    #[error("signal extraction failed: {message}")]
    SignalExtractionFailed { message: String },

    /// A playbook cannot run here (unknown tool, capability, or invalid graph).
    #[error("playbook {code} unusable: {message}")]
    PlaybookUnusable { code: String, message: String },

    /// A store write lost an optimistic-concurrency race or hit a terminal guard.
    #[error("persistence conflict on {entity}: {message}")]
    PersistenceConflict { entity: String, message: String },
}

impl CoreError {
    /// Stable machine code; the `code` field of `session_error` timeline events.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ProviderUnavailable { .. } => "provider_unavailable",
            CoreError::SchemaViolation { .. } => "schema_violation",
            CoreError::ToolCallMalformed { .. } => "tool_call_malformed",
            CoreError::PermissionDenied { .. } => "permission_denied",
            CoreError::StepTimeout { .. } => "step_timeout",
            CoreError::CostCapExceeded { .. } => "cost_cap_exceeded",
            CoreError::SandboxDenied { .. } => "sandbox_denied",
            CoreError::Cancelled => "cancelled",
            CoreError::SignalExtractionFailed { .. } => "signal_extraction_failed",
            CoreError::PlaybookUnusable { .. } => "playbook_unusable",
            CoreError::PersistenceConflict { .. } => "persistence_conflict",
        }
    }

    /// Structured diagnostics for the timeline `details` field.
    pub fn details(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        match self {
            CoreError::ProviderUnavailable { provider, message } => {
                map.insert("provider".into(), Value::String(provider.clone()));
                map.insert("message".into(), Value::String(message.clone()));
            }
            CoreError::SchemaViolation { location, message } => {
                map.insert("location".into(), Value::String(location.clone()));
                map.insert("message".into(), Value::String(message.clone()));
            }
            CoreError::ToolCallMalformed { message }
            | CoreError::SignalExtractionFailed { message } => {
                map.insert("message".into(), Value::String(message.clone()));
            }
            CoreError::PermissionDenied { action, message } => {
                map.insert("action".into(), Value::String(action.clone()));
                map.insert("message".into(), Value::String(message.clone()));
            }
            CoreError::StepTimeout {
                step_id,
                timeout_ms,
            } => {
                map.insert("step_id".into(), Value::String(step_id.clone()));
                map.insert("timeout_ms".into(), Value::from(*timeout_ms));
            }
            CoreError::CostCapExceeded {
                scope,
                cap_usd,
                accrued_usd,
            } => {
                map.insert("scope".into(), Value::String(scope.clone()));
                map.insert("cap_usd".into(), Value::from(*cap_usd));
                map.insert("accrued_usd".into(), Value::from(*accrued_usd));
            }
            CoreError::SandboxDenied { path } => {
                map.insert("path".into(), Value::String(path.clone()));
            }
            CoreError::Cancelled => {}
            CoreError::PlaybookUnusable { code, message } => {
                map.insert("playbook_code".into(), Value::String(code.clone()));
                map.insert("message".into(), Value::String(message.clone()));
            }
            CoreError::PersistenceConflict { entity, message } => {
                map.insert("entity".into(), Value::String(entity.clone()));
                map.insert("message".into(), Value::String(message.clone()));
            }
        }
        map
    }

    /// True for kinds the runtime may retry (transient provider and timeout failures).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::ProviderUnavailable { .. } | CoreError::StepTimeout { .. }
        )
    }

    /// Kinds that terminate the whole session regardless of `continue_on_error`.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::CostCapExceeded { .. }
                | CoreError::Cancelled
                | CoreError::PlaybookUnusable { .. }
        )
    }
}

/// Persistence-layer error; converted to `CoreError::PersistenceConflict` at the seam.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency conflict: row version moved underneath the writer.
    #[error("version conflict on {entity}")]
    Conflict { entity: String },

    /// Write rejected by the terminal-state guard.
    #[error("{entity} is terminal; writes rejected")]
    Terminal { entity: String },

    /// Row not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Underlying storage failure (sqlite, serialization, task join).
    #[error("storage: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        let entity = match &e {
            StoreError::Conflict { entity }
            | StoreError::Terminal { entity }
            | StoreError::NotFound { entity, .. } => entity.clone(),
            StoreError::Storage(_) => "store".to_string(),
        };
        CoreError::PersistenceConflict {
            entity,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_snake_case() {
        let errs: Vec<CoreError> = vec![
            CoreError::Cancelled,
            CoreError::SandboxDenied {
                path: "../x".into(),
            },
            CoreError::CostCapExceeded {
                scope: "safe_write".into(),
                cap_usd: 0.1,
                accrued_usd: 0.2,
            },
        ];
        let codes: Vec<_> = errs.iter().map(|e| e.code()).collect();
        assert_eq!(codes, vec!["cancelled", "sandbox_denied", "cost_cap_exceeded"]);
    }

    #[test]
    fn details_carry_structured_fields() {
        let err = CoreError::StepTimeout {
            step_id: "draft".into(),
            timeout_ms: 120_000,
        };
        let d = err.details();
        assert_eq!(d["step_id"], "draft");
        assert_eq!(d["timeout_ms"], 120_000);
    }

    #[test]
    fn store_conflict_maps_to_persistence_conflict() {
        let core: CoreError = StoreError::Conflict {
            entity: "executions".into(),
        }
        .into();
        assert_eq!(core.code(), "persistence_conflict");
    }

    /// **Scenario**: cost-cap and cancellation are session-fatal; timeouts are not.
    #[test]
    fn fatality_classification() {
        assert!(CoreError::Cancelled.is_session_fatal());
        assert!(!CoreError::StepTimeout {
            step_id: "s".into(),
            timeout_ms: 1
        }
        .is_session_fatal());
        assert!(CoreError::StepTimeout {
            step_id: "s".into(),
            timeout_ms: 1
        }
        .is_transient());
    }
}
