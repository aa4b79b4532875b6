//! SQLite-backed stores. Persistent across process restarts.
//!
//! One file holds every table; rows keep their entity as JSON in a `data`
//! column next to the indexed columns (`workspace_id` first everywhere).
//! Connections are opened per operation inside `spawn_blocking`, keeping the
//! async executor free of blocking sqlite work.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::domain::{
    Artifact, ExecutionSession, IntentCard, IntentCluster, IntentSignal, PlaybookVariant, Project,
    StepRecord, ToolConnection, Workspace,
};
use crate::error::StoreError;

use super::{
    ArtifactStore, ExecutionStore, IntentCardStore, IntentClusterStore, IntentSignalStore,
    PlaybookVariantStore, ProjectStore, ToolConnectionStore, WorkspaceStore,
};

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

pub struct SqliteStores {
    db_path: PathBuf,
}

impl SqliteStores {
    /// Opens (creating if needed) the database and ensures the schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = path.into();
        let conn = Connection::open(&db_path).map_err(storage)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workspaces (
                workspace_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS projects (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            CREATE TABLE IF NOT EXISTS intent_cards (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_cards_ws_updated
                ON intent_cards (workspace_id, updated_at DESC);
            CREATE TABLE IF NOT EXISTS intent_signals (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_signals_ws_created
                ON intent_signals (workspace_id, created_at DESC);
            CREATE TABLE IF NOT EXISTS intent_clusters (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            CREATE TABLE IF NOT EXISTS playbook_variants (
                workspace_id TEXT NOT NULL DEFAULT '',
                id TEXT PRIMARY KEY,
                owner_actor_id TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_variants_ws ON playbook_variants (workspace_id);
            CREATE TABLE IF NOT EXISTS executions (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_executions_id ON executions (id);
            CREATE TABLE IF NOT EXISTS step_records (
                workspace_id TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (execution_id, step_id)
            );
            CREATE INDEX IF NOT EXISTS idx_steps_exec ON step_records (execution_id, step_index);
            CREATE TABLE IF NOT EXISTS artifacts (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                path TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_artifacts_session ON artifacts (session_id);
            CREATE TABLE IF NOT EXISTS tool_connections (
                workspace_id TEXT NOT NULL,
                id TEXT NOT NULL,
                tool_type TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (workspace_id, id)
            );
            "#,
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(storage)?;
            f(&mut conn)
        })
        .await
        .map_err(storage)?
    }
}

fn row_data<T: serde::de::DeserializeOwned>(data: String) -> Result<T, StoreError> {
    serde_json::from_str(&data).map_err(|e| StoreError::Storage(e.to_string()))
}

#[async_trait]
impl WorkspaceStore for SqliteStores {
    async fn create(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let data = serde_json::to_string(workspace)?;
        let id = workspace.id.clone();
        let version = workspace.version as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO workspaces (workspace_id, version, data) VALUES (?1, ?2, ?3)",
                params![id, version, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<Workspace>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM workspaces WHERE workspace_id = ?1")
                .map_err(storage)?;
            let data: Option<String> = stmt
                .query_row(params![id], |row| row.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn update(&self, workspace: &Workspace) -> Result<Workspace, StoreError> {
        let mut next = workspace.clone();
        next.version += 1;
        let data = serde_json::to_string(&next)?;
        let id = workspace.id.clone();
        let expected = workspace.version as i64;
        let stored = next.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE workspaces SET version = version + 1, data = ?3
                     WHERE workspace_id = ?1 AND version = ?2",
                    params![id, expected, data],
                )
                .map_err(storage)?;
            if changed == 0 {
                let exists: bool = conn
                    .query_row(
                        "SELECT COUNT(*) FROM workspaces WHERE workspace_id = ?1",
                        params![id],
                        |row| row.get::<_, i64>(0).map(|n| n > 0),
                    )
                    .map_err(storage)?;
                return Err(if exists {
                    StoreError::Conflict {
                        entity: "workspaces".into(),
                    }
                } else {
                    StoreError::NotFound {
                        entity: "workspaces".into(),
                        id,
                    }
                });
            }
            Ok(stored)
        })
        .await
    }
}

#[async_trait]
impl ProjectStore for SqliteStores {
    async fn create(&self, project: &Project) -> Result<(), StoreError> {
        let data = serde_json::to_string(project)?;
        let ws = project.workspace_id.clone();
        let id = project.id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO projects (workspace_id, id, data) VALUES (?1, ?2, ?3)",
                params![ws, id, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<Project>, StoreError> {
        let ws = workspace_id.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM projects WHERE workspace_id = ?1 AND id = ?2",
                    params![ws, id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<Project>, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM projects WHERE workspace_id = ?1")
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl IntentCardStore for SqliteStores {
    async fn insert(&self, card: &IntentCard) -> Result<(), StoreError> {
        let data = serde_json::to_string(card)?;
        let ws = card.workspace_id.clone();
        let id = card.id.clone();
        let updated = card.updated_at.to_rfc3339();
        let version = card.version as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO intent_cards (workspace_id, id, updated_at, version, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ws, id, updated, version, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<IntentCard>, StoreError> {
        let ws = workspace_id.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM intent_cards WHERE workspace_id = ?1 AND id = ?2",
                    params![ws, id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn update(&self, card: &IntentCard) -> Result<IntentCard, StoreError> {
        let mut next = card.clone();
        next.version += 1;
        let data = serde_json::to_string(&next)?;
        let ws = card.workspace_id.clone();
        let id = card.id.clone();
        let updated = next.updated_at.to_rfc3339();
        let expected = card.version as i64;
        let stored = next.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE intent_cards SET version = version + 1, data = ?4, updated_at = ?5
                     WHERE workspace_id = ?1 AND id = ?2 AND version = ?3",
                    params![ws, id, expected, data, updated],
                )
                .map_err(storage)?;
            if changed == 0 {
                let exists: bool = conn
                    .query_row(
                        "SELECT COUNT(*) FROM intent_cards WHERE workspace_id = ?1 AND id = ?2",
                        params![ws, id],
                        |row| row.get::<_, i64>(0).map(|n| n > 0),
                    )
                    .map_err(storage)?;
                return Err(if exists {
                    StoreError::Conflict {
                        entity: "intent_cards".into(),
                    }
                } else {
                    StoreError::NotFound {
                        entity: "intent_cards".into(),
                        id,
                    }
                });
            }
            Ok(stored)
        })
        .await
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<IntentCard>, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM intent_cards WHERE workspace_id = ?1
                     ORDER BY updated_at DESC",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl IntentSignalStore for SqliteStores {
    async fn insert(&self, signal: &IntentSignal) -> Result<(), StoreError> {
        let data = serde_json::to_string(signal)?;
        let ws = signal.workspace_id.clone();
        let id = signal.id.clone();
        let created = signal.created_at.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO intent_signals (workspace_id, id, created_at, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ws, id, created, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn list_recent(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<IntentSignal>, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM intent_signals WHERE workspace_id = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws, limit as i64], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn delete(&self, workspace_id: &str, ids: &[String]) -> Result<(), StoreError> {
        let ws = workspace_id.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage)?;
            for id in &ids {
                tx.execute(
                    "DELETE FROM intent_signals WHERE workspace_id = ?1 AND id = ?2",
                    params![ws, id],
                )
                .map_err(storage)?;
            }
            tx.commit().map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn prune(&self, workspace_id: &str, keep: usize) -> Result<usize, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let dropped = conn
                .execute(
                    "DELETE FROM intent_signals WHERE workspace_id = ?1 AND id NOT IN (
                         SELECT id FROM intent_signals WHERE workspace_id = ?1
                         ORDER BY created_at DESC LIMIT ?2
                     )",
                    params![ws, keep as i64],
                )
                .map_err(storage)?;
            Ok(dropped)
        })
        .await
    }
}

#[async_trait]
impl IntentClusterStore for SqliteStores {
    async fn replace_all(
        &self,
        workspace_id: &str,
        clusters: &[IntentCluster],
        assignments: &[(String, String)],
    ) -> Result<(), StoreError> {
        let ws = workspace_id.to_string();
        let rows: Vec<(String, String)> = clusters
            .iter()
            .map(|c| Ok((c.id.clone(), serde_json::to_string(c)?)))
            .collect::<Result<_, StoreError>>()?;
        let assignments = assignments.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage)?;
            tx.execute(
                "DELETE FROM intent_clusters WHERE workspace_id = ?1",
                params![ws],
            )
            .map_err(storage)?;
            for (id, data) in &rows {
                tx.execute(
                    "INSERT INTO intent_clusters (workspace_id, id, data) VALUES (?1, ?2, ?3)",
                    params![ws, id, data],
                )
                .map_err(storage)?;
            }
            // Rewrite card back-references in the same transaction: clear, then
            // set for assigned cards, patching the JSON copy alongside.
            tx.execute(
                "UPDATE intent_cards SET data = json_set(data, '$.cluster_id', json('null'))
                 WHERE workspace_id = ?1",
                params![ws],
            )
            .map_err(storage)?;
            for (card_id, cluster_id) in &assignments {
                tx.execute(
                    "UPDATE intent_cards SET data = json_set(data, '$.cluster_id', ?3)
                     WHERE workspace_id = ?1 AND id = ?2",
                    params![ws, card_id, cluster_id],
                )
                .map_err(storage)?;
            }
            tx.commit().map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<IntentCluster>, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM intent_clusters WHERE workspace_id = ?1")
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl PlaybookVariantStore for SqliteStores {
    async fn insert(&self, variant: &PlaybookVariant) -> Result<(), StoreError> {
        let data = serde_json::to_string(variant)?;
        let ws = variant.workspace_id.clone().unwrap_or_default();
        let owner = variant.owner_actor_id.clone().unwrap_or_default();
        let id = variant.id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO playbook_variants (workspace_id, id, owner_actor_id, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ws, id, owner, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<PlaybookVariant>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM playbook_variants WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn list_visible(
        &self,
        workspace_id: &str,
        actor_id: &str,
    ) -> Result<Vec<PlaybookVariant>, StoreError> {
        let ws = workspace_id.to_string();
        let actor = actor_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM playbook_variants
                     WHERE workspace_id = ?1 OR owner_actor_id = ?2",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws, actor], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl ExecutionStore for SqliteStores {
    async fn create_session(&self, session: &ExecutionSession) -> Result<(), StoreError> {
        let data = serde_json::to_string(session)?;
        let ws = session.workspace_id.clone();
        let id = session.execution_id.clone();
        let status = session.status.as_str().to_string();
        let version = session.version as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO executions (workspace_id, id, status, version, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ws, id, status, version, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get_session(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionSession>, StoreError> {
        let id = execution_id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM executions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn update_session(
        &self,
        session: &ExecutionSession,
    ) -> Result<ExecutionSession, StoreError> {
        let mut next = session.clone();
        next.version += 1;
        let data = serde_json::to_string(&next)?;
        let ws = session.workspace_id.clone();
        let id = session.execution_id.clone();
        let status = next.status.as_str().to_string();
        let expected = session.version as i64;
        let stored = next.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage)?;
            // Terminal guard before the optimistic write.
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM executions WHERE workspace_id = ?1 AND id = ?2",
                    params![ws, id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            match current.as_deref() {
                None => {
                    return Err(StoreError::NotFound {
                        entity: "executions".into(),
                        id,
                    })
                }
                Some("completed") | Some("failed") | Some("cancelled") => {
                    return Err(StoreError::Terminal {
                        entity: "executions".into(),
                    })
                }
                Some(_) => {}
            }
            let changed = tx
                .execute(
                    "UPDATE executions SET version = version + 1, status = ?4, data = ?5
                     WHERE workspace_id = ?1 AND id = ?2 AND version = ?3",
                    params![ws, id, expected, status, data],
                )
                .map_err(storage)?;
            if changed == 0 {
                return Err(StoreError::Conflict {
                    entity: "executions".into(),
                });
            }
            tx.commit().map_err(storage)?;
            Ok(stored)
        })
        .await
    }

    async fn list_sessions(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<ExecutionSession>, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM executions WHERE workspace_id = ?1")
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        let data = serde_json::to_string(step)?;
        let exec_id = step.execution_id.clone();
        let step_id = step.step_id.clone();
        let index = step.index as i64;
        self.with_conn(move |conn| {
            // workspace_id denormalized from the owning execution row.
            let ws: String = conn
                .query_row(
                    "SELECT workspace_id FROM executions WHERE id = ?1",
                    params![exec_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "executions".into(),
                        id: exec_id.clone(),
                    },
                    other => storage(other),
                })?;
            conn.execute(
                "INSERT OR REPLACE INTO step_records
                 (workspace_id, execution_id, step_id, step_index, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ws, exec_id, step_id, index, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let id = execution_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM step_records WHERE execution_id = ?1 ORDER BY step_index",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl ArtifactStore for SqliteStores {
    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let data = serde_json::to_string(artifact)?;
        let ws = artifact.workspace_id.clone();
        let id = artifact.id.clone();
        let session = artifact.session_id.clone();
        let path = artifact.path.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO artifacts (workspace_id, id, session_id, path, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![ws, id, session, path, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn list_by_session(
        &self,
        workspace_id: &str,
        session_id: &str,
    ) -> Result<Vec<Artifact>, StoreError> {
        let ws = workspace_id.to_string();
        let session = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT data FROM artifacts WHERE workspace_id = ?1 AND session_id = ?2",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws, session], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }

    async fn find_by_path(
        &self,
        workspace_id: &str,
        session_id: &str,
        path: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        let ws = workspace_id.to_string();
        let session = session_id.to_string();
        let path = path.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM artifacts
                     WHERE workspace_id = ?1 AND session_id = ?2 AND path = ?3",
                    params![ws, session, path],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn delete(&self, workspace_id: &str, id: &str) -> Result<(), StoreError> {
        let ws = workspace_id.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM artifacts WHERE workspace_id = ?1 AND id = ?2",
                params![ws, id],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ToolConnectionStore for SqliteStores {
    async fn upsert(&self, connection: &ToolConnection) -> Result<(), StoreError> {
        let data = serde_json::to_string(connection)?;
        let ws = connection.workspace_id.clone();
        let id = connection.id.clone();
        let tool_type = connection.tool_type.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tool_connections (workspace_id, id, tool_type, data)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ws, id, tool_type, data],
            )
            .map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        workspace_id: &str,
        id: &str,
    ) -> Result<Option<ToolConnection>, StoreError> {
        let ws = workspace_id.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM tool_connections WHERE workspace_id = ?1 AND id = ?2",
                    params![ws, id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn find_by_tool_type(
        &self,
        workspace_id: &str,
        tool_type: &str,
    ) -> Result<Option<ToolConnection>, StoreError> {
        let ws = workspace_id.to_string();
        let tool_type = tool_type.to_string();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM tool_connections
                     WHERE workspace_id = ?1 AND tool_type = ?2 LIMIT 1",
                    params![ws, tool_type],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            data.map(row_data).transpose()
        })
        .await
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<ToolConnection>, StoreError> {
        let ws = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT data FROM tool_connections WHERE workspace_id = ?1")
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![ws], |row| row.get::<_, String>(0))
                .map_err(storage)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row_data(row.map_err(storage)?)?);
            }
            Ok(out)
        })
        .await
    }
}
