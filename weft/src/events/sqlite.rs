//! SQLite-backed event log.
//!
//! The `events` table shares the database file with the entity stores. Seq
//! assignment happens inside the append transaction — the stored high-water
//! mark seeds a [`timeline_event::EnvelopeState`] that hands out the next
//! number — so concurrent appenders to one session cannot produce duplicate
//! or decreasing numbers, and numbering continues across process restarts.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use timeline_event::EnvelopeState;

use crate::error::CoreError;
use crate::ports::{Event, EventFilter, EventLogPort, NewEvent};

fn storage(e: impl std::fmt::Display) -> CoreError {
    CoreError::PersistenceConflict {
        entity: "events".into(),
        message: e.to_string(),
    }
}

pub struct SqliteEventLog {
    db_path: PathBuf,
}

impl SqliteEventLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let db_path = path.into();
        let conn = Connection::open(&db_path).map_err(storage)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                workspace_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                session_id TEXT,
                seq INTEGER,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_ws ON events (workspace_id, ts);
            CREATE INDEX IF NOT EXISTS idx_events_session ON events (session_id, seq);
            "#,
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl EventLogPort for SqliteEventLog {
    async fn append(&self, event: NewEvent) -> Result<Event, CoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage)?;
            let tx = conn.transaction().map_err(storage)?;
            let seq: Option<u64> = match &event.session_id {
                Some(sid) => {
                    let last: i64 = tx
                        .query_row(
                            "SELECT COALESCE(MAX(seq), 0) FROM events WHERE session_id = ?1",
                            params![sid],
                            |row| row.get(0),
                        )
                        .map_err(storage)?;
                    let mut state = EnvelopeState::resuming_after(
                        event.workspace_id.clone(),
                        Some(sid.clone()),
                        last as u64,
                    );
                    Some(state.next())
                }
                None => None,
            };
            let ts = Utc::now();
            let payload = serde_json::to_string(&event.payload).map_err(storage)?;
            tx.execute(
                "INSERT INTO events (workspace_id, ts, session_id, seq, kind, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.workspace_id,
                    ts.to_rfc3339(),
                    event.session_id,
                    seq.map(|s| s as i64),
                    event.kind,
                    payload
                ],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)?;
            Ok(Event {
                ts,
                workspace_id: event.workspace_id,
                session_id: event.session_id,
                seq,
                kind: event.kind,
                payload: event.payload,
            })
        })
        .await
        .map_err(storage)?
    }

    async fn range(
        &self,
        workspace_id: &str,
        filter: EventFilter,
    ) -> Result<Vec<Event>, CoreError> {
        let db_path = self.db_path.clone();
        let ws = workspace_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path).map_err(storage)?;
            let mut sql = String::from(
                "SELECT ts, session_id, seq, kind, payload FROM events
                 WHERE workspace_id = ?1",
            );
            if filter.session_id.is_some() {
                sql.push_str(" AND session_id = ?2");
            }
            sql.push_str(" ORDER BY ts, seq");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, Option<String>, Option<i64>, String, String)> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            };
            let rows: Vec<_> = match &filter.session_id {
                Some(sid) => stmt
                    .query_map(params![ws, sid], map_row)
                    .map_err(storage)?
                    .collect::<Result<_, _>>()
                    .map_err(storage)?,
                None => stmt
                    .query_map(params![ws], map_row)
                    .map_err(storage)?
                    .collect::<Result<_, _>>()
                    .map_err(storage)?,
            };
            let mut out = Vec::with_capacity(rows.len());
            for (ts, session_id, seq, kind, payload) in rows {
                if let Some(ref want) = filter.kind {
                    if want != &kind {
                        continue;
                    }
                }
                let ts: DateTime<Utc> = ts
                    .parse::<DateTime<chrono::FixedOffset>>()
                    .map_err(storage)?
                    .with_timezone(&Utc);
                if let Some(since) = filter.since {
                    if ts < since {
                        continue;
                    }
                }
                out.push(Event {
                    ts,
                    workspace_id: ws.clone(),
                    session_id,
                    seq: seq.map(|s| s as u64),
                    kind,
                    payload: serde_json::from_str(&payload).map_err(storage)?,
                });
            }
            Ok(out)
        })
        .await
        .map_err(storage)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(sid: Option<&str>, kind: &str) -> NewEvent {
        NewEvent {
            workspace_id: "ws-1".into(),
            session_id: sid.map(|s| s.to_string()),
            kind: kind.into(),
            payload: json!({"k": kind}),
        }
    }

    #[tokio::test]
    async fn seq_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.db3");
        {
            let log = SqliteEventLog::open(&path).unwrap();
            let a = log.append(ev(Some("sess-1"), "step_started")).await.unwrap();
            assert_eq!(a.seq, Some(1));
        }
        // A fresh process continues the same session's numbering.
        let log = SqliteEventLog::open(&path).unwrap();
        let b = log.append(ev(Some("sess-1"), "step_finished")).await.unwrap();
        assert_eq!(b.seq, Some(2));
    }

    #[tokio::test]
    async fn range_orders_session_events_by_seq() {
        let dir = tempfile::tempdir().unwrap();
        let log = SqliteEventLog::open(dir.path().join("weft.db3")).unwrap();
        for kind in ["session_started", "step_started", "step_finished"] {
            log.append(ev(Some("sess-1"), kind)).await.unwrap();
        }
        let events = log
            .range(
                "ws-1",
                EventFilter {
                    session_id: Some("sess-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let seqs: Vec<_> = events.iter().map(|e| e.seq.unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
