//! Intent entities: disposable signals, committed cards, semantic clusters,
//! and the steward's per-turn layout plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a signal came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Message,
    File,
    ToolOutput,
    PlaybookEvent,
}

/// Internal, disposable intent signal. Produced in unbounded volume; never
/// user-visible; garbage-collected after governance (bounded ring per workspace).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentSignal {
    pub id: String,
    pub workspace_id: String,
    pub source: SignalSource,
    pub text: String,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
    pub topic_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IntentSignal {
    pub fn new(
        workspace_id: impl Into<String>,
        source: SignalSource,
        text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            source,
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            topic_hint: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardPriority {
    High,
    Medium,
    Low,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Active,
    Completed,
    Dismissed,
}

/// User-visible, committed intent. Created by the steward only; dismissed,
/// never hard-deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentCard {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub description: String,
    pub priority: CardPriority,
    pub status: CardStatus,
    pub cluster_id: Option<String>,
    /// Playbook codes associated with this intent (back-references, not ownership).
    #[serde(default)]
    pub playbooks: Vec<String>,
    /// Execution ids spawned from this intent (back-references).
    #[serde(default)]
    pub executions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl IntentCard {
    pub fn new(
        workspace_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: CardPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.into(),
            title: title.into(),
            description: description.into(),
            priority,
            status: CardStatus::Active,
            cluster_id: None,
            playbooks: Vec::new(),
            executions: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

/// Semantic grouping of cards. Rebuildable from scratch; ids are ephemeral per
/// rebuild (no identity promised across rebuilds).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentCluster {
    pub id: String,
    pub workspace_id: String,
    /// LLM-named label.
    pub label: String,
    pub centroid: Vec<f32>,
    pub member_card_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One governance operation in a layout plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayoutOp {
    CreateCard {
        title: String,
        description: String,
        priority: CardPriority,
        /// Signals folded into the new card.
        signal_ids: Vec<String>,
    },
    UpdateCard {
        card_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: Option<CardPriority>,
        #[serde(default)]
        status: Option<CardStatus>,
        #[serde(default)]
        signal_ids: Vec<String>,
    },
    KeepSignalOnly { signal_id: String },
    DismissSignal { signal_id: String },
}

/// The steward's per-turn output. Applied atomically by a single transactional
/// writer; operations reference signals and cards by id only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntentLayoutPlan {
    pub workspace_id: String,
    pub ops: Vec<LayoutOp>,
}

impl IntentLayoutPlan {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ops: Vec::new(),
        }
    }

    /// Degraded plan: every signal kept, nothing promoted. Used when stage B fails.
    pub fn keep_all(workspace_id: impl Into<String>, signal_ids: &[String]) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ops: signal_ids
                .iter()
                .map(|id| LayoutOp::KeepSignalOnly {
                    signal_id: id.clone(),
                })
                .collect(),
        }
    }
}
