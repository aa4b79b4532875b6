//! Vector store implementations: in-memory (tests) and sqlite-vec (local adapter).

use std::path::PathBuf;
use std::sync::Once;

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::params;
use serde_json::Value;

use crate::embedding::cosine_similarity;
use crate::error::CoreError;
use crate::ports::{VectorHit, VectorStorePort};

/// Workspace-scoped in-memory index with exact cosine search.
#[derive(Default)]
pub struct InMemoryVectorStore {
    rows: DashMap<(String, String), (Vec<f32>, Value)>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStorePort for InMemoryVectorStore {
    async fn upsert(
        &self,
        workspace_id: &str,
        key: &str,
        vector: &[f32],
        payload: Value,
    ) -> Result<(), CoreError> {
        self.rows.insert(
            (workspace_id.to_string(), key.to_string()),
            (vector.to_vec(), payload),
        );
        Ok(())
    }

    async fn search(
        &self,
        workspace_id: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, CoreError> {
        let mut hits: Vec<VectorHit> = self
            .rows
            .iter()
            .filter(|e| e.key().0 == workspace_id)
            .map(|e| VectorHit {
                key: e.key().1.clone(),
                score: cosine_similarity(vector, &e.value().0),
                payload: e.value().1.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, workspace_id: &str, keys: &[String]) -> Result<(), CoreError> {
        for key in keys {
            self.rows.remove(&(workspace_id.to_string(), key.clone()));
        }
        Ok(())
    }
}

static SQLITE_VEC_INIT: Once = Once::new();

fn storage(e: impl std::fmt::Display) -> CoreError {
    CoreError::PersistenceConflict {
        entity: "vector_index".into(),
        message: e.to_string(),
    }
}

/// Formats a Vec<f32> as JSON for sqlite-vec (e.g. "[0.1,0.2,0.3]").
fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// sqlite-vec backed index. Dual-table design: metadata row per key plus a
/// vec0 virtual table for the embeddings; KNN search via `MATCH`.
pub struct SqliteVecStore {
    db_path: PathBuf,
    dimension: usize,
}

impl SqliteVecStore {
    /// Registers the sqlite-vec extension and ensures the tables.
    pub fn open(path: impl Into<PathBuf>, dimension: usize) -> Result<Self, CoreError> {
        SQLITE_VEC_INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });
        let db_path = path.into();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS vector_meta (
                id INTEGER PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                key TEXT NOT NULL,
                payload TEXT NOT NULL,
                UNIQUE(workspace_id, key)
            )
            "#,
            [],
        )
        .map_err(storage)?;
        conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vector_embeddings USING vec0(embedding float[{dimension}])"
            ),
            [],
        )
        .map_err(storage)?;
        Ok(Self { db_path, dimension })
    }
}

#[async_trait]
impl VectorStorePort for SqliteVecStore {
    async fn upsert(
        &self,
        workspace_id: &str,
        key: &str,
        vector: &[f32],
        payload: Value,
    ) -> Result<(), CoreError> {
        if vector.len() != self.dimension {
            return Err(CoreError::SchemaViolation {
                location: "vector_index".into(),
                message: format!(
                    "vector has {} dims, index expects {}",
                    vector.len(),
                    self.dimension
                ),
            });
        }
        let db_path = self.db_path.clone();
        let ws = workspace_id.to_string();
        let key = key.to_string();
        let vec_json = vector_to_json(vector);
        let payload = serde_json::to_string(&payload).map_err(storage)?;
        tokio::task::spawn_blocking(move || {
            let mut conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let tx = conn.transaction().map_err(storage)?;
            // Delete-then-insert keeps meta rowid and embedding rowid aligned.
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM vector_meta WHERE workspace_id = ?1 AND key = ?2",
                    params![ws, key],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(storage(other)),
                })?;
            if let Some(id) = existing {
                tx.execute("DELETE FROM vector_meta WHERE id = ?1", params![id])
                    .map_err(storage)?;
                tx.execute(
                    "DELETE FROM vector_embeddings WHERE rowid = ?1",
                    params![id],
                )
                .map_err(storage)?;
            }
            tx.execute(
                "INSERT INTO vector_meta (workspace_id, key, payload) VALUES (?1, ?2, ?3)",
                params![ws, key, payload],
            )
            .map_err(storage)?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO vector_embeddings (rowid, embedding) VALUES (?1, ?2)",
                params![id, vec_json],
            )
            .map_err(storage)?;
            tx.commit().map_err(storage)?;
            Ok(())
        })
        .await
        .map_err(storage)?
    }

    async fn search(
        &self,
        workspace_id: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, CoreError> {
        let db_path = self.db_path.clone();
        let ws = workspace_id.to_string();
        let vec_json = vector_to_json(vector);
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            // Over-fetch: KNN runs before the workspace filter.
            let mut stmt = conn
                .prepare(
                    "SELECT e.rowid, e.distance, m.workspace_id, m.key, m.payload
                     FROM vector_embeddings e
                     JOIN vector_meta m ON m.id = e.rowid
                     WHERE e.embedding MATCH ?1 AND k = ?2",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![vec_json, (top_k * 8).max(32) as i64], |row| {
                    Ok((
                        row.get::<_, f64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(storage)?;
            let mut hits = Vec::new();
            for row in rows {
                let (distance, row_ws, key, payload) = row.map_err(storage)?;
                if row_ws != ws {
                    continue;
                }
                hits.push(VectorHit {
                    key,
                    // vec0 distance is L2 over normalized vectors; map back to cosine.
                    score: 1.0 - (distance as f32).powi(2) / 2.0,
                    payload: serde_json::from_str(&payload).map_err(storage)?,
                });
                if hits.len() == top_k {
                    break;
                }
            }
            Ok(hits)
        })
        .await
        .map_err(storage)?
    }

    async fn delete(&self, workspace_id: &str, keys: &[String]) -> Result<(), CoreError> {
        let db_path = self.db_path.clone();
        let ws = workspace_id.to_string();
        let keys = keys.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = rusqlite::Connection::open(&db_path).map_err(storage)?;
            let tx = conn.transaction().map_err(storage)?;
            for key in &keys {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM vector_meta WHERE workspace_id = ?1 AND key = ?2",
                        params![ws, key],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(storage(other)),
                    })?;
                if let Some(id) = existing {
                    tx.execute("DELETE FROM vector_meta WHERE id = ?1", params![id])
                        .map_err(storage)?;
                    tx.execute(
                        "DELETE FROM vector_embeddings WHERE rowid = ?1",
                        params![id],
                    )
                    .map_err(storage)?;
                }
            }
            tx.commit().map_err(storage)?;
            Ok(())
        })
        .await
        .map_err(storage)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::ports::EmbeddingPort;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_search_is_workspace_scoped() {
        let store = InMemoryVectorStore::new();
        let e = HashEmbedder::new(16);
        let vs = e
            .embed(&["content plan".into(), "content plan".into()])
            .await
            .unwrap();
        store
            .upsert("ws-1", "card-1", &vs[0], json!({"t": "a"}))
            .await
            .unwrap();
        store
            .upsert("ws-2", "card-2", &vs[1], json!({"t": "b"}))
            .await
            .unwrap();
        let hits = store.search("ws-1", &vs[0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "card-1");
    }

    #[tokio::test]
    async fn in_memory_upsert_replaces() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("ws-1", "k", &[1.0, 0.0], json!({"v": 1}))
            .await
            .unwrap();
        store
            .upsert("ws-1", "k", &[0.0, 1.0], json!({"v": 2}))
            .await
            .unwrap();
        let hits = store.search("ws-1", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].payload["v"], 2);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn delete_removes_keys() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("ws-1", "k", &[1.0, 0.0], json!({}))
            .await
            .unwrap();
        store.delete("ws-1", &["k".to_string()]).await.unwrap();
        let hits = store.search("ws-1", &[1.0, 0.0], 1).await.unwrap();
        assert!(hits.is_empty());
    }
}
