//! Tool connections: how a workspace reaches a tool, and how dangerous it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Local,
    Remote,
}

/// Danger classification; high-danger write steps require approval before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerLevel {
    Low,
    Medium,
    High,
}

/// Remote half of a connection: where to post and which upstream connection to use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteConnection {
    pub remote_cluster_url: String,
    pub remote_connection_id: String,
    #[serde(default)]
    pub config: Value,
}

/// A workspace's handle on one tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolConnection {
    pub id: String,
    pub workspace_id: String,
    pub tool_type: String,
    pub connection_type: ConnectionType,
    pub danger_level: DangerLevel,
    /// When true, write-classified calls are refused without dispatch.
    pub default_readonly: bool,
    /// Actor ids allowed to use this connection; empty means everyone.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Local adapter configuration.
    #[serde(default)]
    pub local_config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConnection>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl ToolConnection {
    pub fn local(
        workspace_id: impl Into<String>,
        tool_type: impl Into<String>,
        danger_level: DangerLevel,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            tool_type: tool_type.into(),
            connection_type: ConnectionType::Local,
            danger_level,
            default_readonly: false,
            allowed_roles: Vec::new(),
            local_config: Value::Null,
            remote: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn remote(
        workspace_id: impl Into<String>,
        tool_type: impl Into<String>,
        danger_level: DangerLevel,
        remote: RemoteConnection,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            tool_type: tool_type.into(),
            connection_type: ConnectionType::Remote,
            danger_level,
            default_readonly: false,
            allowed_roles: Vec::new(),
            local_config: Value::Null,
            remote: Some(remote),
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn readonly(mut self) -> Self {
        self.default_readonly = true;
        self
    }
}
