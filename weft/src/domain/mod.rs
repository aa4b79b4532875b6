//! Domain entities persisted by the stores and exchanged between pipelines.
//!
//! Plain serde structs and closed enums; behavior lives in the pipelines, not
//! here. Ownership: Workspace owns Projects, Intents, ExecutionSessions, and
//! ToolConnections; Project owns its sandbox; ExecutionSession owns StepRecords
//! and Artifacts. IntentCard references playbooks and executions by id only.

mod execution;
mod intent;
mod playbook;
mod tool_connection;
mod workspace;

pub use execution::{
    Artifact, CostLedger, ExecutionSession, PauseReason, SessionStatus, StepError, StepRecord,
    StepState, ToolCallRecord,
};
pub use intent::{
    CardPriority, CardStatus, IntentCard, IntentCluster, IntentLayoutPlan, IntentSignal, LayoutOp,
    SignalSource,
};
pub use playbook::{
    validate_step_graph, DecisionSpec, Frontmatter, IrFieldType, IrSchema, PlaybookScope,
    PlaybookTemplate, PlaybookVariant, ResolvedPlaybook, StepSpec, StepSpecKind,
};
pub use tool_connection::{ConnectionType, DangerLevel, RemoteConnection, ToolConnection};
pub use workspace::{LaunchStatus, Project, ProjectState, Workspace};
