//! Identity port: caller token to execution context.

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::CoreError;

/// Resolves a caller token into an immutable [`ExecutionContext`].
///
/// The local adapter maps every token onto the single local actor; a remote
/// adapter validates the token and fills in tenant tags. Provider-specific
/// identifiers stay behind this port.
#[async_trait]
pub trait IdentityPort: Send + Sync {
    async fn resolve(
        &self,
        token: &str,
        workspace_id: &str,
    ) -> Result<ExecutionContext, CoreError>;
}
