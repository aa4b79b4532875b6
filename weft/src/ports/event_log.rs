//! Event log port: append-only record every component writes to and every
//! read surface derives from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// A not-yet-appended event.
#[derive(Clone, Debug)]
pub struct NewEvent {
    pub workspace_id: String,
    pub session_id: Option<String>,
    pub kind: String,
    pub payload: Value,
}

impl NewEvent {
    /// Workspace-level event (no session).
    pub fn workspace(workspace_id: impl Into<String>, wire: &timeline_event::WireEvent) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            session_id: None,
            kind: wire.kind().to_string(),
            payload: wire.to_value().unwrap_or(Value::Null),
        }
    }

    /// Session-scoped event; appended with the session's next sequence number.
    pub fn session(
        workspace_id: impl Into<String>,
        session_id: impl Into<String>,
        wire: &timeline_event::WireEvent,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            session_id: Some(session_id.into()),
            kind: wire.kind().to_string(),
            payload: wire.to_value().unwrap_or(Value::Null),
        }
    }
}

/// An appended event as read back from the log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub workspace_id: String,
    pub session_id: Option<String>,
    /// Per-session sequence number, strictly increasing; `None` for
    /// workspace-level events.
    pub seq: Option<u64>,
    pub kind: String,
    pub payload: Value,
}

/// Range-query filter.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub kind: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Append-only event log.
///
/// Appends for a given session are totally ordered and monotonic by `ts` plus
/// the session sequence number; across sessions no ordering is promised.
#[async_trait]
pub trait EventLogPort: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<Event, CoreError>;

    async fn range(
        &self,
        workspace_id: &str,
        filter: EventFilter,
    ) -> Result<Vec<Event>, CoreError>;
}
