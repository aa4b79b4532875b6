//! In-memory stores for tests and ephemeral runs.
//!
//! Same semantics as the sqlite implementation: optimistic versioning,
//! terminal-state guard, bounded signal ring.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{
    Artifact, ExecutionSession, IntentCard, IntentCluster, IntentSignal, PlaybookVariant, Project,
    StepRecord, ToolConnection, Workspace,
};
use crate::error::StoreError;

use super::{
    ArtifactStore, ExecutionStore, IntentCardStore, IntentClusterStore, IntentSignalStore,
    PlaybookVariantStore, ProjectStore, ToolConnectionStore, WorkspaceStore,
};

/// Everything in DashMaps; keys are `(workspace_id, id)` pairs where scoping
/// matters.
#[derive(Default)]
pub struct MemoryStores {
    workspaces: DashMap<String, Workspace>,
    projects: DashMap<(String, String), Project>,
    cards: DashMap<(String, String), IntentCard>,
    signals: DashMap<(String, String), IntentSignal>,
    clusters: DashMap<String, Vec<IntentCluster>>,
    variants: DashMap<String, PlaybookVariant>,
    sessions: DashMap<String, ExecutionSession>,
    steps: DashMap<(String, String), StepRecord>,
    artifacts: DashMap<(String, String), Artifact>,
    connections: DashMap<(String, String), ToolConnection>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStores {
    async fn create(&self, workspace: &Workspace) -> Result<(), StoreError> {
        self.workspaces
            .insert(workspace.id.clone(), workspace.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Workspace>, StoreError> {
        Ok(self.workspaces.get(id).map(|w| w.clone()))
    }

    async fn update(&self, workspace: &Workspace) -> Result<Workspace, StoreError> {
        let mut entry =
            self.workspaces
                .get_mut(&workspace.id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "workspaces".into(),
                    id: workspace.id.clone(),
                })?;
        if entry.version != workspace.version {
            return Err(StoreError::Conflict {
                entity: "workspaces".into(),
            });
        }
        let mut next = workspace.clone();
        next.version += 1;
        *entry = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl ProjectStore for MemoryStores {
    async fn create(&self, project: &Project) -> Result<(), StoreError> {
        self.projects.insert(
            (project.workspace_id.clone(), project.id.clone()),
            project.clone(),
        );
        Ok(())
    }

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self
            .projects
            .get(&(workspace_id.to_string(), id.to_string()))
            .map(|p| p.clone()))
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<Project>, StoreError> {
        Ok(self
            .projects
            .iter()
            .filter(|e| e.key().0 == workspace_id)
            .map(|e| e.value().clone())
            .collect())
    }
}

#[async_trait]
impl IntentCardStore for MemoryStores {
    async fn insert(&self, card: &IntentCard) -> Result<(), StoreError> {
        self.cards
            .insert((card.workspace_id.clone(), card.id.clone()), card.clone());
        Ok(())
    }

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<IntentCard>, StoreError> {
        Ok(self
            .cards
            .get(&(workspace_id.to_string(), id.to_string()))
            .map(|c| c.clone()))
    }

    async fn update(&self, card: &IntentCard) -> Result<IntentCard, StoreError> {
        let key = (card.workspace_id.clone(), card.id.clone());
        let mut entry = self.cards.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            entity: "intent_cards".into(),
            id: card.id.clone(),
        })?;
        if entry.version != card.version {
            return Err(StoreError::Conflict {
                entity: "intent_cards".into(),
            });
        }
        let mut next = card.clone();
        next.version += 1;
        *entry = next.clone();
        Ok(next)
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<IntentCard>, StoreError> {
        let mut cards: Vec<IntentCard> = self
            .cards
            .iter()
            .filter(|e| e.key().0 == workspace_id)
            .map(|e| e.value().clone())
            .collect();
        cards.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(cards)
    }
}

#[async_trait]
impl IntentSignalStore for MemoryStores {
    async fn insert(&self, signal: &IntentSignal) -> Result<(), StoreError> {
        self.signals.insert(
            (signal.workspace_id.clone(), signal.id.clone()),
            signal.clone(),
        );
        Ok(())
    }

    async fn list_recent(
        &self,
        workspace_id: &str,
        limit: usize,
    ) -> Result<Vec<IntentSignal>, StoreError> {
        let mut signals: Vec<IntentSignal> = self
            .signals
            .iter()
            .filter(|e| e.key().0 == workspace_id)
            .map(|e| e.value().clone())
            .collect();
        signals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        signals.truncate(limit);
        Ok(signals)
    }

    async fn delete(&self, workspace_id: &str, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            self.signals.remove(&(workspace_id.to_string(), id.clone()));
        }
        Ok(())
    }

    async fn prune(&self, workspace_id: &str, keep: usize) -> Result<usize, StoreError> {
        let mut signals: Vec<(String, chrono::DateTime<chrono::Utc>)> = self
            .signals
            .iter()
            .filter(|e| e.key().0 == workspace_id)
            .map(|e| (e.key().1.clone(), e.value().created_at))
            .collect();
        if signals.len() <= keep {
            return Ok(0);
        }
        signals.sort_by(|a, b| b.1.cmp(&a.1));
        let stale: Vec<String> = signals.into_iter().skip(keep).map(|(id, _)| id).collect();
        let dropped = stale.len();
        for id in &stale {
            self.signals.remove(&(workspace_id.to_string(), id.clone()));
        }
        Ok(dropped)
    }
}

#[async_trait]
impl IntentClusterStore for MemoryStores {
    async fn replace_all(
        &self,
        workspace_id: &str,
        clusters: &[IntentCluster],
        assignments: &[(String, String)],
    ) -> Result<(), StoreError> {
        self.clusters
            .insert(workspace_id.to_string(), clusters.to_vec());
        // Rewrite card back-references with the rebuild.
        let assigned: std::collections::HashMap<&str, &str> = assignments
            .iter()
            .map(|(card, cluster)| (card.as_str(), cluster.as_str()))
            .collect();
        for mut entry in self.cards.iter_mut() {
            if entry.key().0 != workspace_id {
                continue;
            }
            let card_id = entry.key().1.clone();
            entry.value_mut().cluster_id = assigned.get(card_id.as_str()).map(|s| s.to_string());
        }
        Ok(())
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<IntentCluster>, StoreError> {
        Ok(self
            .clusters
            .get(workspace_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PlaybookVariantStore for MemoryStores {
    async fn insert(&self, variant: &PlaybookVariant) -> Result<(), StoreError> {
        self.variants.insert(variant.id.clone(), variant.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PlaybookVariant>, StoreError> {
        Ok(self.variants.get(id).map(|v| v.clone()))
    }

    async fn list_visible(
        &self,
        workspace_id: &str,
        actor_id: &str,
    ) -> Result<Vec<PlaybookVariant>, StoreError> {
        Ok(self
            .variants
            .iter()
            .filter(|e| {
                e.value().workspace_id.as_deref() == Some(workspace_id)
                    || e.value().owner_actor_id.as_deref() == Some(actor_id)
            })
            .map(|e| e.value().clone())
            .collect())
    }
}

#[async_trait]
impl ExecutionStore for MemoryStores {
    async fn create_session(&self, session: &ExecutionSession) -> Result<(), StoreError> {
        self.sessions
            .insert(session.execution_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionSession>, StoreError> {
        Ok(self.sessions.get(execution_id).map(|s| s.clone()))
    }

    async fn update_session(
        &self,
        session: &ExecutionSession,
    ) -> Result<ExecutionSession, StoreError> {
        let mut entry = self
            .sessions
            .get_mut(&session.execution_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "executions".into(),
                id: session.execution_id.clone(),
            })?;
        if entry.status.is_terminal() {
            return Err(StoreError::Terminal {
                entity: "executions".into(),
            });
        }
        if entry.version != session.version {
            return Err(StoreError::Conflict {
                entity: "executions".into(),
            });
        }
        let mut next = session.clone();
        next.version += 1;
        *entry = next.clone();
        Ok(next)
    }

    async fn list_sessions(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<ExecutionSession>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|e| e.value().workspace_id == workspace_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn upsert_step(&self, step: &StepRecord) -> Result<(), StoreError> {
        self.steps.insert(
            (step.execution_id.clone(), step.step_id.clone()),
            step.clone(),
        );
        Ok(())
    }

    async fn get_steps(&self, execution_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        let mut steps: Vec<StepRecord> = self
            .steps
            .iter()
            .filter(|e| e.key().0 == execution_id)
            .map(|e| e.value().clone())
            .collect();
        steps.sort_by_key(|s| s.index);
        Ok(steps)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStores {
    async fn insert(&self, artifact: &Artifact) -> Result<(), StoreError> {
        self.artifacts.insert(
            (artifact.workspace_id.clone(), artifact.id.clone()),
            artifact.clone(),
        );
        Ok(())
    }

    async fn list_by_session(
        &self,
        workspace_id: &str,
        session_id: &str,
    ) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .artifacts
            .iter()
            .filter(|e| e.key().0 == workspace_id && e.value().session_id == session_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn find_by_path(
        &self,
        workspace_id: &str,
        session_id: &str,
        path: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        Ok(self
            .artifacts
            .iter()
            .find(|e| {
                e.key().0 == workspace_id
                    && e.value().session_id == session_id
                    && e.value().path == path
            })
            .map(|e| e.value().clone()))
    }

    async fn delete(&self, workspace_id: &str, id: &str) -> Result<(), StoreError> {
        self.artifacts
            .remove(&(workspace_id.to_string(), id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ToolConnectionStore for MemoryStores {
    async fn upsert(&self, connection: &ToolConnection) -> Result<(), StoreError> {
        self.connections.insert(
            (connection.workspace_id.clone(), connection.id.clone()),
            connection.clone(),
        );
        Ok(())
    }

    async fn get(
        &self,
        workspace_id: &str,
        id: &str,
    ) -> Result<Option<ToolConnection>, StoreError> {
        Ok(self
            .connections
            .get(&(workspace_id.to_string(), id.to_string()))
            .map(|c| c.clone()))
    }

    async fn find_by_tool_type(
        &self,
        workspace_id: &str,
        tool_type: &str,
    ) -> Result<Option<ToolConnection>, StoreError> {
        Ok(self
            .connections
            .iter()
            .find(|e| e.key().0 == workspace_id && e.value().tool_type == tool_type)
            .map(|e| e.value().clone()))
    }

    async fn list(&self, workspace_id: &str) -> Result<Vec<ToolConnection>, StoreError> {
        Ok(self
            .connections
            .iter()
            .filter(|e| e.key().0 == workspace_id)
            .map(|e| e.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CardPriority, SessionStatus};
    use serde_json::json;

    #[tokio::test]
    async fn card_update_bumps_version_and_detects_conflict() {
        let stores = MemoryStores::new();
        let card = IntentCard::new("ws-1", "Draft plan", "weekly content plan", CardPriority::High);
        IntentCardStore::insert(&stores, &card).await.unwrap();

        let mut first = card.clone();
        first.title = "Draft the plan".into();
        let stored = IntentCardStore::update(&stores, &first).await.unwrap();
        assert_eq!(stored.version, 1);

        // A writer holding the stale version loses.
        let mut stale = card;
        stale.title = "Stale".into();
        let err = IntentCardStore::update(&stores, &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    /// **Scenario**: once a session is terminal, writes to status/index are rejected.
    #[tokio::test]
    async fn terminal_session_rejects_writes() {
        let stores = MemoryStores::new();
        let mut session =
            ExecutionSession::new("ws-1", None, "content_drafting", None, json!({}));
        stores.create_session(&session).await.unwrap();

        session.status = SessionStatus::Running;
        let session = stores.update_session(&session).await.unwrap();
        let mut done = session.clone();
        done.status = SessionStatus::Completed;
        let done = stores.update_session(&done).await.unwrap();

        let mut after = done.clone();
        after.status = SessionStatus::Running;
        after.current_step_index = 5;
        let err = stores.update_session(&after).await.unwrap_err();
        assert!(matches!(err, StoreError::Terminal { .. }));
    }

    #[tokio::test]
    async fn signal_ring_prunes_oldest_first() {
        let stores = MemoryStores::new();
        for i in 0..6 {
            let mut s = crate::domain::IntentSignal::new(
                "ws-1",
                crate::domain::SignalSource::Message,
                format!("signal {i}"),
                0.9,
            );
            s.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            stores.insert(&s).await.unwrap();
        }
        let dropped = stores.prune("ws-1", 4).await.unwrap();
        assert_eq!(dropped, 2);
        let left = stores.list_recent("ws-1", 100).await.unwrap();
        assert_eq!(left.len(), 4);
        assert_eq!(left[0].text, "signal 5");
    }

    #[tokio::test]
    async fn cluster_rebuild_rewrites_card_references() {
        let stores = MemoryStores::new();
        let card = IntentCard::new("ws-1", "A", "a", CardPriority::Low);
        IntentCardStore::insert(&stores, &card).await.unwrap();
        let cluster = IntentCluster {
            id: "cl-1".into(),
            workspace_id: "ws-1".into(),
            label: "content".into(),
            centroid: vec![0.1, 0.2],
            member_card_ids: vec![card.id.clone()],
            created_at: chrono::Utc::now(),
        };
        stores
            .replace_all("ws-1", &[cluster], &[(card.id.clone(), "cl-1".into())])
            .await
            .unwrap();
        let got = IntentCardStore::get(&stores, "ws-1", &card.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.cluster_id.as_deref(), Some("cl-1"));
    }
}
