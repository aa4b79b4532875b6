//! Execution sessions, step records, artifacts, and the cost ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle. `pending → running → (awaiting_tool ↔ running)* →
/// {completed | failed | cancelled | paused}`; `paused → running` on resume;
/// terminal states are sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    AwaitingTool,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    /// Whether `self → to` is a legal transition.
    pub fn allows(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, to) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, AwaitingTool)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            (AwaitingTool, Running)
            | (AwaitingTool, Failed)
            | (AwaitingTool, Cancelled)
            | (AwaitingTool, Paused) => true,
            (Paused, Running) | (Paused, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::AwaitingTool => "awaiting_tool",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Why a session is paused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Explicit user pause.
    UserRequested,
    /// A step needs human approval (e.g. a high-danger tool call).
    ApprovalRequired { step_id: String },
}

/// Running cost totals, persisted with the session.
///
/// Sub-playbook sessions share the parent's ledger so nested cost is
/// attributed to the parent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CostLedger {
    pub total_usd: f64,
    /// Accrued per capability profile (snake_case profile names).
    #[serde(default)]
    pub by_profile: BTreeMap<String, f64>,
}

impl CostLedger {
    pub fn record(&mut self, profile: &str, usd: f64) {
        self.total_usd += usd;
        *self.by_profile.entry(profile.to_string()).or_insert(0.0) += usd;
    }

    pub fn accrued(&self, profile: &str) -> f64 {
        self.by_profile.get(profile).copied().unwrap_or(0.0)
    }
}

/// One run of a playbook. Append-only aside from status, index, and accrued
/// cost; once terminal, no further mutation (enforced by the execution store).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub execution_id: String,
    pub workspace_id: String,
    pub project_id: Option<String>,
    pub playbook_code: String,
    pub variant_id: Option<String>,
    /// Parent execution when this is a sub-playbook run.
    pub parent_execution_id: Option<String>,
    pub status: SessionStatus,
    pub current_step_index: usize,
    /// Session inputs as provided at start.
    pub inputs: Value,
    pub cost: CostLedger,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_reason: Option<PauseReason>,
    /// Step ids whose approval gate has been satisfied (resume after an
    /// approval pause records the step here).
    #[serde(default)]
    pub approved_steps: Vec<String>,
    #[serde(default)]
    pub version: u64,
}

impl ExecutionSession {
    pub fn new(
        workspace_id: impl Into<String>,
        project_id: Option<String>,
        playbook_code: impl Into<String>,
        variant_id: Option<String>,
        inputs: Value,
    ) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            project_id,
            playbook_code: playbook_code.into(),
            variant_id,
            parent_execution_id: None,
            status: SessionStatus::Pending,
            current_step_index: 0,
            inputs,
            cost: CostLedger::default(),
            started_at: Utc::now(),
            completed_at: None,
            paused_reason: None,
            approved_steps: Vec::new(),
            version: 0,
        }
    }
}

/// Step state within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    WaitingTool,
    Succeeded,
    Failed,
    Skipped,
}

/// A recorded error on a step: stable code + human message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// One dispatched tool call within a step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_type: String,
    pub action: String,
    pub args: Value,
    /// Idempotency key derived from (session, step, args).
    pub idempotency_key: String,
    pub result: Option<Value>,
    pub error: Option<StepError>,
}

/// Per-step record, owned by a session. `outputs_ir` is the stable typed JSON
/// that downstream steps read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub execution_id: String,
    pub index: usize,
    pub kind: String,
    pub capability_profile: Option<String>,
    pub inputs_ir: Value,
    pub outputs_ir: Option<Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub errors: Vec<StepError>,
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn pending(execution_id: &str, step_id: &str, index: usize, kind: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            execution_id: execution_id.to_string(),
            index,
            kind: kind.to_string(),
            capability_profile: None,
            inputs_ir: Value::Null,
            outputs_ir: None,
            tool_calls: Vec::new(),
            errors: Vec::new(),
            state: StepState::Pending,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A registered file under the owning project's sandbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub workspace_id: String,
    pub session_id: String,
    /// Path relative to the sandbox root.
    pub path: String,
    pub mime: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: terminal states are sinks; no transition out is legal.
    #[test]
    fn terminal_states_allow_nothing() {
        for terminal in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            for to in [
                SessionStatus::Pending,
                SessionStatus::Running,
                SessionStatus::Paused,
                SessionStatus::Cancelled,
            ] {
                assert!(!terminal.allows(to), "{terminal:?} -> {to:?} must be rejected");
            }
        }
    }

    #[test]
    fn awaiting_tool_round_trips_with_running() {
        assert!(SessionStatus::Running.allows(SessionStatus::AwaitingTool));
        assert!(SessionStatus::AwaitingTool.allows(SessionStatus::Running));
    }

    #[test]
    fn ledger_accrues_per_profile_and_total() {
        let mut ledger = CostLedger::default();
        ledger.record("standard", 0.002);
        ledger.record("standard", 0.003);
        ledger.record("fast", 0.001);
        assert!((ledger.accrued("standard") - 0.005).abs() < 1e-12);
        assert!((ledger.total_usd - 0.006).abs() < 1e-12);
    }
}
