//! Uniform tool invocation: local adapters, the remote HTTP adapter, danger
//! gating, bounded retries, and per-step idempotency.

mod dispatch;
mod local;
mod remote;

pub use dispatch::{idempotency_key, ToolDispatcher};
pub use local::{ClockTool, MockTool, SandboxFilesTool};
pub use remote::RemoteToolClient;
