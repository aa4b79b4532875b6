//! Embedding port.

use async_trait::async_trait;

use crate::error::CoreError;

/// Turns texts into vectors. Used by the intent steward's pre-screen and by
/// clustering; all vectors within one adapter share a dimension.
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;

    /// Vector dimension this adapter produces.
    fn dimension(&self) -> usize;
}
