//! Vector store port: workspace-scoped upsert and cosine search.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;

/// One search hit.
#[derive(Clone, Debug)]
pub struct VectorHit {
    pub key: String,
    /// Cosine similarity in `[-1, 1]`; higher is closer.
    pub score: f32,
    pub payload: Value,
}

/// Workspace-scoped vector index.
///
/// Keys are caller-chosen (card ids, signal ids); rows never cross workspaces.
#[async_trait]
pub trait VectorStorePort: Send + Sync {
    async fn upsert(
        &self,
        workspace_id: &str,
        key: &str,
        vector: &[f32],
        payload: Value,
    ) -> Result<(), CoreError>;

    async fn search(
        &self,
        workspace_id: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>, CoreError>;

    async fn delete(&self, workspace_id: &str, keys: &[String]) -> Result<(), CoreError>;
}
