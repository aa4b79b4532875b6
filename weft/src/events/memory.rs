//! In-memory event log for tests and ephemeral runs.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use timeline_event::EnvelopeState;

use crate::error::CoreError;
use crate::ports::{Event, EventFilter, EventLogPort, NewEvent};

/// Append-only vector behind a mutex; per-session envelope state hands out the
/// sequence numbers.
#[derive(Default)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<Event>>,
    sessions: DashMap<String, EnvelopeState>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLogPort for InMemoryEventLog {
    async fn append(&self, event: NewEvent) -> Result<Event, CoreError> {
        let seq = event.session_id.as_ref().map(|sid| {
            let mut state = self.sessions.entry(sid.clone()).or_insert_with(|| {
                EnvelopeState::new(event.workspace_id.clone(), Some(sid.clone()))
            });
            state.next()
        });
        let stored = Event {
            ts: Utc::now(),
            workspace_id: event.workspace_id,
            session_id: event.session_id,
            seq,
            kind: event.kind,
            payload: event.payload,
        };
        self.events
            .lock()
            .map_err(|_| CoreError::PersistenceConflict {
                entity: "events".into(),
                message: "event log poisoned".into(),
            })?
            .push(stored.clone());
        Ok(stored)
    }

    async fn range(
        &self,
        workspace_id: &str,
        filter: EventFilter,
    ) -> Result<Vec<Event>, CoreError> {
        let events = self
            .events
            .lock()
            .map_err(|_| CoreError::PersistenceConflict {
                entity: "events".into(),
                message: "event log poisoned".into(),
            })?;
        let mut out: Vec<Event> = events
            .iter()
            .filter(|e| e.workspace_id == workspace_id)
            .filter(|e| {
                filter
                    .session_id
                    .as_ref()
                    .map_or(true, |sid| e.session_id.as_deref() == Some(sid.as_str()))
            })
            .filter(|e| filter.kind.as_ref().map_or(true, |k| &e.kind == k))
            .filter(|e| filter.since.map_or(true, |since| e.ts >= since))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
