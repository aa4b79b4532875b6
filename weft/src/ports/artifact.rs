//! Artifact store port: sandboxed write + registration + listing.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::domain::Artifact;
use crate::error::CoreError;

/// Writes artifacts into a project sandbox and registers them.
///
/// The write and the registration are atomic: either both succeed or the
/// staged file is rolled back. Paths are relative to the sandbox root; escapes
/// are refused with `sandbox_denied`.
#[async_trait]
pub trait ArtifactStorePort: Send + Sync {
    async fn write(
        &self,
        ctx: &ExecutionContext,
        session_id: &str,
        relative_path: &str,
        content: &[u8],
        mime: &str,
        summary: &str,
        idempotency_key: &str,
    ) -> Result<Artifact, CoreError>;

    async fn list(&self, ctx: &ExecutionContext, session_id: &str)
        -> Result<Vec<Artifact>, CoreError>;
}
