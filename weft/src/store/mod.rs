//! Durable stores for domain entities.
//!
//! One narrow trait per entity, an in-memory implementation for tests and
//! ephemeral runs, and the sqlite implementation behind the local adapter.
//! Every row carries `workspace_id` as its first indexed column; there are no
//! cross-workspace foreign keys.
//!
//! Concurrency: the card store and session store are the only hot shared
//! mutables. Writers hold the per-workspace lock from [`WorkspaceLocks`];
//! reads are optimistic against a `version` column and a lost race surfaces as
//! `StoreError::Conflict`, retried once under the lock by the caller.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Artifact, ExecutionSession, IntentCard, IntentCluster, IntentSignal, PlaybookVariant, Project,
    StepRecord, ToolConnection, Workspace,
};
use crate::error::StoreError;

pub use memory::MemoryStores;
pub use sqlite::SqliteStores;

/// Per-workspace write serialization.
///
/// Steward applies and session writers take this lock; it is per workspace,
/// never global.
#[derive(Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, workspace_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn create(&self, workspace: &Workspace) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Workspace>, StoreError>;
    /// Optimistic write: fails with `Conflict` when `workspace.version` is stale.
    async fn update(&self, workspace: &Workspace) -> Result<Workspace, StoreError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create(&self, project: &Project) -> Result<(), StoreError>;
    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<Project>, StoreError>;
    async fn list(&self, workspace_id: &str) -> Result<Vec<Project>, StoreError>;
}

#[async_trait]
pub trait IntentCardStore: Send + Sync {
    async fn insert(&self, card: &IntentCard) -> Result<(), StoreError>;
    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<IntentCard>, StoreError>;
    /// Optimistic write keyed on `card.version`.
    async fn update(&self, card: &IntentCard) -> Result<IntentCard, StoreError>;
    async fn list(&self, workspace_id: &str) -> Result<Vec<IntentCard>, StoreError>;
}

#[async_trait]
pub trait IntentSignalStore: Send + Sync {
    async fn insert(&self, signal: &IntentSignal) -> Result<(), StoreError>;
    async fn list_recent(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<IntentSignal>, StoreError>;
    async fn delete(&self, workspace_id: &str, ids: &[String]) -> Result<(), StoreError>;
    /// Bounded-ring maintenance: drops the oldest rows beyond `keep`.
    async fn prune(&self, workspace_id: &str, keep: usize) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait IntentClusterStore: Send + Sync {
    /// Atomic rebuild: replaces the workspace's clusters and rewrites card
    /// back-references in one transaction. `assignments` maps card id to the
    /// new cluster id (cards absent from the map lose their cluster).
    async fn replace_all(
        &self,
        workspace_id: &str,
        clusters: &[IntentCluster],
        assignments: &[(String, String)],
    ) -> Result<(), StoreError>;
    async fn list(&self, workspace_id: &str) -> Result<Vec<IntentCluster>, StoreError>;
}

#[async_trait]
pub trait PlaybookVariantStore: Send + Sync {
    async fn insert(&self, variant: &PlaybookVariant) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<PlaybookVariant>, StoreError>;
    /// Variants visible to a request: workspace-scoped ones for the workspace
    /// plus profile-scoped ones for the actor.
    async fn list_visible(
        &self,
        workspace_id: &str,
        actor_id: &str,
    ) -> Result<Vec<PlaybookVariant>, StoreError>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_session(&self, session: &ExecutionSession) -> Result<(), StoreError>;
    async fn get_session(&self, execution_id: &str)
        -> Result<Option<ExecutionSession>, StoreError>;
    /// Optimistic write keyed on `session.version`. Rejected with `Terminal`
    /// once the persisted row is `completed | failed | cancelled`.
    async fn update_session(
        &self,
        session: &ExecutionSession,
    ) -> Result<ExecutionSession, StoreError>;
    async fn list_sessions(&self, workspace_id: &str)
        -> Result<Vec<ExecutionSession>, StoreError>;
    async fn upsert_step(&self, step: &StepRecord) -> Result<(), StoreError>;
    /// Steps ordered by index.
    async fn get_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, StoreError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError>;
    async fn list_by_session(
        &self,
        workspace_id: &str,
        session_id: &str,
    ) -> Result<Vec<Artifact>, StoreError>;
    async fn find_by_path(
        &self,
        workspace_id: &str,
        session_id: &str,
        path: &str,
    ) -> Result<Option<Artifact>, StoreError>;
    /// Removes the registration row (artifact-write rollback).
    async fn delete(&self, workspace_id: &str, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ToolConnectionStore: Send + Sync {
    async fn upsert(&self, connection: &ToolConnection) -> Result<(), StoreError>;
    async fn get(&self, workspace_id: &str, id: &str)
        -> Result<Option<ToolConnection>, StoreError>;
    async fn find_by_tool_type(
        &self,
        workspace_id: &str,
        tool_type: &str,
    ) -> Result<Option<ToolConnection>, StoreError>;
    async fn list(&self, workspace_id: &str) -> Result<Vec<ToolConnection>, StoreError>;
}

/// The full set of stores handed to the composition root.
#[derive(Clone)]
pub struct StoreSet {
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub cards: Arc<dyn IntentCardStore>,
    pub signals: Arc<dyn IntentSignalStore>,
    pub clusters: Arc<dyn IntentClusterStore>,
    pub variants: Arc<dyn PlaybookVariantStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub connections: Arc<dyn ToolConnectionStore>,
    pub locks: WorkspaceLocks,
}

impl StoreSet {
    /// All stores backed by one in-memory implementation.
    pub fn in_memory() -> Self {
        let stores = Arc::new(MemoryStores::new());
        Self::from_shared(stores)
    }

    /// All stores backed by one sqlite file.
    pub fn sqlite(db_path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let stores = Arc::new(SqliteStores::open(db_path)?);
        Ok(Self::from_shared(stores))
    }

    fn from_shared<S>(stores: Arc<S>) -> Self
    where
        S: WorkspaceStore
            + ProjectStore
            + IntentCardStore
            + IntentSignalStore
            + IntentClusterStore
            + PlaybookVariantStore
            + ExecutionStore
            + ArtifactStore
            + ToolConnectionStore
            + 'static,
    {
        Self {
            workspaces: stores.clone(),
            projects: stores.clone(),
            cards: stores.clone(),
            signals: stores.clone(),
            clusters: stores.clone(),
            variants: stores.clone(),
            executions: stores.clone(),
            artifacts: stores.clone(),
            connections: stores,
            locks: WorkspaceLocks::new(),
        }
    }
}
