//! Workspace and project containers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Launch status of a workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStatus {
    Pending,
    Ready,
    Active,
}

/// Long-lived container holding projects, intents, and execution history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub primary_project_id: Option<String>,
    pub launch_status: LaunchStatus,
    /// Base path for project sandboxes; the local adapter defaults this from config.
    pub storage_base_path: Option<String>,
    /// Per-playbook storage overrides: playbook code -> base path.
    #[serde(default)]
    pub storage_overrides: BTreeMap<String, String>,
    /// Playbook codes pinned to this workspace; preferred by decision tie-breaks.
    #[serde(default)]
    pub pinned_playbooks: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version, bumped on every store write.
    #[serde(default)]
    pub version: u64,
}

impl Workspace {
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            owner: owner.into(),
            primary_project_id: None,
            launch_status: LaunchStatus::Pending,
            storage_base_path: None,
            storage_overrides: BTreeMap::new(),
            pinned_playbooks: Vec::new(),
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Pins are only honored while the workspace is active.
    pub fn effective_pins(&self) -> &[String] {
        if self.launch_status == LaunchStatus::Active {
            &self.pinned_playbooks
        } else {
            &[]
        }
    }
}

/// Lifecycle state of a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Open,
    Closed,
    Archived,
}

/// Delivery container within a workspace; owns a sandbox root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub workspace_id: String,
    pub project_type: String,
    pub title: String,
    pub state: ProjectState,
    pub flow_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Project {
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        project_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            project_type: project_type.into(),
            title: title.into(),
            state: ProjectState::Open,
            flow_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_ignored_unless_active() {
        let mut ws = Workspace::new("ws-1", "Demo", "u-1");
        ws.pinned_playbooks.push("content_drafting".to_string());
        assert!(ws.effective_pins().is_empty());
        ws.launch_status = LaunchStatus::Active;
        assert_eq!(ws.effective_pins(), ["content_drafting".to_string()]);
    }
}
