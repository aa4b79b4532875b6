//! Wire-level event types (kind + payload).
//!
//! Payload-carrying variants use `serde_json::Value`; the core serializes its
//! domain types into that. Kind strings are stable machine codes: timeline
//! consumers match on them, so renaming a kind is a protocol break.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire event: one timeline entry (kind + payload).
/// Envelope fields (workspace_id, session_id, seq) are applied separately.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireEvent {
    /// A user or assistant chat message entered the workspace.
    ChatMessage { role: String, text: String },
    /// A Q&A turn finished; `text` is the assistant reply.
    ChatCompleted { text: String },
    /// Intent extraction failed; the turn continues without signals.
    SignalExtractionFailed { message: String },
    /// A signal survived governance but was not promoted.
    IntentSignalKept { signal_id: String },
    IntentCardCreated { card_id: String, title: String },
    IntentCardUpdated { card_id: String },
    IntentClustersRebuilt { cluster_count: usize },
    /// The decision pipeline classified an utterance.
    DecisionMade { decision: Value },
    SessionStarted {
        playbook_code: String,
        project_id: Option<String>,
    },
    SessionStatusChanged { from: String, to: String },
    StepStarted { step_id: String, kind: String },
    StepFinished {
        step_id: String,
        state: String,
        error_code: Option<String>,
    },
    ToolInvoked {
        tool_type: String,
        action: String,
        connection_id: String,
    },
    ToolCompleted {
        tool_type: String,
        action: String,
        success: bool,
    },
    ArtifactRegistered { artifact_id: String, path: String },
    SessionPaused { reason: String },
    SessionResumed {},
    Cancelled {},
    /// Accrued cost per capability profile at session end.
    CostReport { total_usd: f64, by_profile: Value },
    /// Session-fatal error surfaced to the user: stable machine code + message.
    SessionError {
        code: String,
        message: String,
        details: Value,
    },
}

impl WireEvent {
    /// Serializes this event to a JSON object (kind + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The stable kind string for this event (the `kind` tag on the wire).
    pub fn kind(&self) -> &'static str {
        match self {
            WireEvent::ChatMessage { .. } => event_kind::CHAT_MESSAGE,
            WireEvent::ChatCompleted { .. } => event_kind::CHAT_COMPLETED,
            WireEvent::SignalExtractionFailed { .. } => event_kind::SIGNAL_EXTRACTION_FAILED,
            WireEvent::IntentSignalKept { .. } => event_kind::INTENT_SIGNAL_KEPT,
            WireEvent::IntentCardCreated { .. } => event_kind::INTENT_CARD_CREATED,
            WireEvent::IntentCardUpdated { .. } => event_kind::INTENT_CARD_UPDATED,
            WireEvent::IntentClustersRebuilt { .. } => event_kind::INTENT_CLUSTERS_REBUILT,
            WireEvent::DecisionMade { .. } => event_kind::DECISION_MADE,
            WireEvent::SessionStarted { .. } => event_kind::SESSION_STARTED,
            WireEvent::SessionStatusChanged { .. } => event_kind::SESSION_STATUS_CHANGED,
            WireEvent::StepStarted { .. } => event_kind::STEP_STARTED,
            WireEvent::StepFinished { .. } => event_kind::STEP_FINISHED,
            WireEvent::ToolInvoked { .. } => event_kind::TOOL_INVOKED,
            WireEvent::ToolCompleted { .. } => event_kind::TOOL_COMPLETED,
            WireEvent::ArtifactRegistered { .. } => event_kind::ARTIFACT_REGISTERED,
            WireEvent::SessionPaused { .. } => event_kind::SESSION_PAUSED,
            WireEvent::SessionResumed {} => event_kind::SESSION_RESUMED,
            WireEvent::Cancelled {} => event_kind::CANCELLED,
            WireEvent::CostReport { .. } => event_kind::COST_REPORT,
            WireEvent::SessionError { .. } => event_kind::SESSION_ERROR,
        }
    }
}

/// Stable kind strings, for consumers that filter without deserializing.
pub mod event_kind {
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const CHAT_COMPLETED: &str = "chat_completed";
    pub const SIGNAL_EXTRACTION_FAILED: &str = "signal_extraction_failed";
    pub const INTENT_SIGNAL_KEPT: &str = "intent_signal_kept";
    pub const INTENT_CARD_CREATED: &str = "intent_card_created";
    pub const INTENT_CARD_UPDATED: &str = "intent_card_updated";
    pub const INTENT_CLUSTERS_REBUILT: &str = "intent_clusters_rebuilt";
    pub const DECISION_MADE: &str = "decision_made";
    pub const SESSION_STARTED: &str = "session_started";
    pub const SESSION_STATUS_CHANGED: &str = "session_status_changed";
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_FINISHED: &str = "step_finished";
    pub const TOOL_INVOKED: &str = "tool_invoked";
    pub const TOOL_COMPLETED: &str = "tool_completed";
    pub const ARTIFACT_REGISTERED: &str = "artifact_registered";
    pub const SESSION_PAUSED: &str = "session_paused";
    pub const SESSION_RESUMED: &str = "session_resumed";
    pub const CANCELLED: &str = "cancelled";
    pub const COST_REPORT: &str = "cost_report";
    pub const SESSION_ERROR: &str = "session_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_value_tags_kind() {
        let ev = WireEvent::StepStarted {
            step_id: "draft".to_string(),
            kind: "llm_call".to_string(),
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["kind"], "step_started");
        assert_eq!(v["step_id"], "draft");
    }

    #[test]
    fn kind_matches_serde_tag() {
        let ev = WireEvent::Cancelled {};
        let v = ev.to_value().unwrap();
        assert_eq!(v["kind"], ev.kind());
    }
}
