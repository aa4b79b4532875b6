//! Event log implementations.
//!
//! Everything that happens — chat, tool calls, step transitions, intent-card
//! mutations — is appended here, and every read surface (timeline, health)
//! derives from the log. No component infers state by peeking at another's
//! internals.
//!
//! Ordering: appends for one session get a strictly increasing `seq`;
//! workspace-level events carry no seq. Across sessions nothing is promised.

mod memory;
mod sqlite;

pub use memory::InMemoryEventLog;
pub use sqlite::SqliteEventLog;

use std::sync::Arc;

use serde_json::Value;
use timeline_event::Envelope;

use crate::ports::{Event, EventLogPort, NewEvent};

/// Appends an event, logging instead of failing the caller.
///
/// Error handlers use this: no handler may swallow a failure without at least
/// one event-log entry, but a broken log must not mask the original error.
pub async fn append_best_effort(log: &Arc<dyn EventLogPort>, event: NewEvent) {
    if let Err(e) = log.append(event).await {
        tracing::warn!(error = %e, "event log append failed");
    }
}

/// Converts a stored event to its wire shape: the kind-tagged payload with the
/// envelope (workspace, session, seq) and timestamp stamped on. Timeline
/// consumers read this form, never the storage row.
pub fn to_wire(event: &Event) -> Value {
    let mut value = event.payload.clone();
    if !value.is_object() {
        value = serde_json::json!({ "kind": event.kind });
    }
    let mut envelope = Envelope::new().with_workspace_id(&event.workspace_id);
    if let Some(sid) = &event.session_id {
        envelope = envelope.with_session_id(sid);
    }
    if let Some(seq) = event.seq {
        envelope = envelope.with_seq(seq);
    }
    envelope.inject_into(&mut value);
    if let Some(obj) = value.as_object_mut() {
        obj.entry("ts")
            .or_insert_with(|| Value::String(event.ts.to_rfc3339()));
    }
    value
}

#[cfg(test)]
mod to_wire_tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn wire_form_carries_envelope_and_ts() {
        let event = Event {
            ts: Utc::now(),
            workspace_id: "ws-1".into(),
            session_id: Some("sess-1".into()),
            seq: Some(3),
            kind: "step_started".into(),
            payload: serde_json::json!({"kind": "step_started", "step_id": "draft"}),
        };
        let wire = to_wire(&event);
        assert_eq!(wire["kind"], "step_started");
        assert_eq!(wire["step_id"], "draft");
        assert_eq!(wire["workspace_id"], "ws-1");
        assert_eq!(wire["session_id"], "sess-1");
        assert_eq!(wire["seq"], 3);
        assert!(wire["ts"].is_string());
    }

    #[test]
    fn workspace_events_omit_session_fields() {
        let event = Event {
            ts: Utc::now(),
            workspace_id: "ws-1".into(),
            session_id: None,
            seq: None,
            kind: "chat_message".into(),
            payload: serde_json::json!({"kind": "chat_message", "role": "user", "text": "hi"}),
        };
        let wire = to_wire(&event);
        assert_eq!(wire["workspace_id"], "ws-1");
        assert!(wire.get("session_id").is_none());
        assert!(wire.get("seq").is_none());
    }
}
