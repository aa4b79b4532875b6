//! Capability ports.
//!
//! Object-safe async traits the core is written against; adapters (local
//! single-user, remote multi-tenant) implement them and are handed to the
//! composition root once at startup. Ports are passed explicitly, never looked
//! up from module globals, and no core pipeline branches on tenancy mode.

mod artifact;
mod embedding;
mod event_log;
mod executor;
mod identity;
mod llm;
mod tool;
mod vector;

pub use artifact::ArtifactStorePort;
pub use embedding::EmbeddingPort;
pub use event_log::{Event, EventFilter, EventLogPort, NewEvent};
pub use executor::PlaybookExecutorPort;
pub use identity::IdentityPort;
pub use llm::{
    ChatMessage, ChatRole, LlmClient, LlmUsage, MessageChunk, RawToolCall, ToolDecl, TypedResponse,
};
pub use tool::{LocalTool, ToolResult};
pub use vector::{VectorHit, VectorStorePort};
