//! # Weft
//!
//! A local-first AI-workspace orchestration core. A user converses with a
//! workspace; weft turns messages into structured intents, selects a reusable
//! **playbook** (Markdown + frontmatter + machine-executable step graph), and
//! drives it through LLM calls, tool invocations, and artifact production,
//! surfacing a live, resumable execution trace.
//!
//! ## Design principles
//!
//! - **Ports over conditionals**: the core is written against capability
//!   traits ([`ports`]); local and remote adapter sets implement them. No core
//!   pipeline branches on tenancy mode.
//! - **Append-only truth**: every chat, tool call, step transition, and
//!   intent-card mutation is an event ([`events`]); all read surfaces derive
//!   from the log.
//! - **Capability profiles, not model names**: playbooks name a quality/price
//!   tier (FAST / STANDARD / PRECISE / TOOL_STRICT / SAFE_WRITE); the
//!   [`router`] maps tiers onto configured endpoints under cost ceilings.
//! - **Stable IR between steps**: steps exchange typed JSON validated against
//!   declared schemas, so models can be swapped without touching the runtime.
//! - **Constructed composition root**: [`composition::build_engine`] wires the
//!   local adapter set once at startup; ports are passed explicitly, never
//!   looked up from globals.
//!
//! ## Main modules
//!
//! - [`context`]: [`ExecutionContext`] — immutable per-request envelope.
//! - [`ports`]: capability traits (identity, LLM, embedding, vector store,
//!   tool, executor, artifact store, event log).
//! - [`domain`]: entities — workspaces, projects, intents, playbooks,
//!   sessions, steps, artifacts, tool connections.
//! - [`events`]: append-only event log (sqlite + in-memory).
//! - [`intent`]: extractor, steward, clustering.
//! - [`decision`]: the three-layer execution decision pipeline.
//! - [`router`]: capability profiles onto model endpoints.
//! - [`playbook`]: parsing (frontmatter + step graph) and resolution
//!   (scope precedence, locale closeness, validation).
//! - [`runtime`]: the graph executor — scheduling, cost governance,
//!   cancellation, pause/resume, idempotency.
//! - [`sandbox`]: per-project confined filesystem + atomic artifact writes.
//! - [`tools`]: uniform dispatch for local and remote tools, danger gating.
//! - [`store`]: durable stores (sqlite + in-memory) with per-workspace locks.
//! - [`engine`]: the workspace chat entry point.
//! - [`composition`]: the local adapter set builder.

pub mod composition;
pub mod context;
pub mod decision;
pub mod domain;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod events;
pub mod intent;
pub mod llm;
pub mod playbook;
pub mod ports;
pub mod router;
pub mod runtime;
pub mod sandbox;
pub mod store;
pub mod tools;
pub mod vector;

pub use composition::{build_engine, build_engine_with, CoreConfig, LocalIdentity, RemoteToolsConfig};
pub use context::{ExecutionContext, TenancyMode};
pub use decision::{Decision, DecisionConfig, DecisionPipeline};
pub use domain::{
    Artifact, CardPriority, CardStatus, ConnectionType, CostLedger, DangerLevel, DecisionSpec,
    ExecutionSession, Frontmatter, IntentCard, IntentCluster, IntentLayoutPlan, IntentSignal,
    IrFieldType, IrSchema, LaunchStatus, LayoutOp, PauseReason, PlaybookScope, PlaybookTemplate,
    PlaybookVariant, Project, ProjectState, RemoteConnection, ResolvedPlaybook, SessionStatus,
    SignalSource, StepError, StepRecord, StepSpec, StepSpecKind, StepState, ToolCallRecord,
    ToolConnection, Workspace,
};
pub use engine::{Engine, EngineReply};
pub use error::{CoreError, StoreError};
pub use events::{to_wire, InMemoryEventLog, SqliteEventLog};
pub use intent::{ExtractSource, IntentClusterer, IntentExtractor, IntentSteward, StewardConfig};
pub use llm::{MockLlm, MockResponse, OpenAiCompatClient, ProviderMux};
pub use playbook::{parse_playbook, serialize_frontmatter, PlaybookLibrary, PlaybookLoader};
pub use ports::{
    ArtifactStorePort, ChatMessage, ChatRole, EmbeddingPort, Event, EventFilter, EventLogPort,
    IdentityPort, LlmClient, LlmUsage, LocalTool, MessageChunk, NewEvent, PlaybookExecutorPort,
    RawToolCall, ToolDecl, ToolResult, TypedResponse, VectorStorePort,
};
pub use router::{
    CapabilityProfile, CapabilityRouter, ModelEndpoint, ModelFeature, ModelHandle, ProfileSpec,
    ProviderKind, RouterConfig,
};
pub use runtime::{ExecutorService, RuntimeDefaults};
pub use sandbox::{LocalArtifactStore, Sandbox, SandboxLayout};
pub use store::{StoreSet, WorkspaceLocks};
pub use tools::{ClockTool, MockTool, RemoteToolClient, SandboxFilesTool, ToolDispatcher};

/// When running `cargo test -p weft`, initializes tracing from `RUST_LOG` so
/// unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
