//! Envelope (workspace_id, session_id, seq) injected into each wire event.
//! EnvelopeState hands out per-session sequence numbers, monotonic within a stream.

use serde_json::Value;

/// Envelope fields stamped onto each timeline message.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Owning workspace; constant within a timeline.
    pub workspace_id: Option<String>,
    /// Execution session the event belongs to, when any.
    pub session_id: Option<String>,
    /// Per-session sequence number; strictly increasing within a session.
    pub seq: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_id(mut self, id: impl Into<String>) -> Self {
        self.workspace_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.workspace_id {
            obj.entry("workspace_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.session_id {
            obj.entry("session_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(seq) = self.seq {
            obj.entry("seq")
                .or_insert_with(|| Value::Number(serde_json::Number::from(seq)));
        }
    }
}

/// Envelope state for one session stream: next seq to hand out.
pub struct EnvelopeState {
    pub workspace_id: String,
    pub session_id: Option<String>,
    next_seq: u64,
}

impl EnvelopeState {
    pub fn new(workspace_id: String, session_id: Option<String>) -> Self {
        Self {
            workspace_id,
            session_id,
            next_seq: 1,
        }
    }

    /// Resumes numbering after `last_seq` (e.g. when a session restarts mid-stream).
    pub fn resuming_after(workspace_id: String, session_id: Option<String>, last_seq: u64) -> Self {
        Self {
            workspace_id,
            session_id,
            next_seq: last_seq + 1,
        }
    }

    /// Stamps the envelope into the event value and advances the sequence.
    pub fn inject_into(&mut self, value: &mut Value) {
        let seq = self.next();
        let mut env = Envelope::new()
            .with_workspace_id(&self.workspace_id)
            .with_seq(seq);
        if let Some(ref sid) = self.session_id {
            env = env.with_session_id(sid);
        }
        env.inject_into(value);
    }

    /// Hands out the next sequence number and advances. For consumers that
    /// stamp the envelope themselves (e.g. a durable log assigning seq inside
    /// its own transaction).
    pub fn next(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// The seq the next event will carry, without advancing.
    pub fn peek_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_does_not_overwrite() {
        let mut obj = serde_json::json!({"kind": "cancelled", "workspace_id": "ws-orig"});
        let env = Envelope::new()
            .with_workspace_id("ws-1")
            .with_session_id("sess-1")
            .with_seq(7);
        env.inject_into(&mut obj);
        assert_eq!(obj["workspace_id"], "ws-orig");
        assert_eq!(obj["session_id"], "sess-1");
        assert_eq!(obj["seq"], 7);
    }

    #[test]
    fn state_hands_out_increasing_seq() {
        let mut state = EnvelopeState::new("ws-1".to_string(), Some("sess-1".to_string()));
        let mut a = serde_json::json!({"kind": "step_started"});
        let mut b = serde_json::json!({"kind": "step_finished"});
        state.inject_into(&mut a);
        state.inject_into(&mut b);
        assert_eq!(a["seq"], 1);
        assert_eq!(b["seq"], 2);
    }

    #[test]
    fn resuming_continues_after_last_seq() {
        let mut state = EnvelopeState::resuming_after("ws-1".to_string(), None, 41);
        let mut v = serde_json::json!({"kind": "session_resumed"});
        state.inject_into(&mut v);
        assert_eq!(v["seq"], 42);
    }

    #[test]
    fn next_advances_like_inject() {
        let mut state = EnvelopeState::new("ws-1".to_string(), Some("sess-1".to_string()));
        assert_eq!(state.next(), 1);
        assert_eq!(state.peek_seq(), 2);
        let mut v = serde_json::json!({"kind": "step_started"});
        state.inject_into(&mut v);
        assert_eq!(v["seq"], 2);
    }
}
