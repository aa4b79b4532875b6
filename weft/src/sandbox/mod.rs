//! Per-project sandbox and the local artifact store.
//!
//! Every step write is confined to the owning project's sandbox root: relative
//! paths only, no `..`, no absolute paths. Writes stage to a sibling temp file
//! and atomically rename into place; the artifact row is registered with the
//! write, and a failed registration rolls the file back.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::context::ExecutionContext;
use crate::domain::Artifact;
use crate::error::CoreError;
use crate::ports::ArtifactStorePort;
use crate::store::ArtifactStore;

/// One project's confined filesystem root.
#[derive(Clone, Debug)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Creates the root directory if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| CoreError::SandboxDenied {
            path: format!("{}: {e}", root.display()),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a relative path inside the sandbox. Absolute paths, `..`
    /// traversal, and empty paths are denied.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CoreError> {
        let denied = || CoreError::SandboxDenied {
            path: relative.to_string(),
        };
        if relative.is_empty() {
            return Err(denied());
        }
        let path = Path::new(relative);
        if path.is_absolute() {
            return Err(denied());
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(denied())
                }
            }
        }
        Ok(self.root.join(path))
    }

    /// Stages content next to the target and renames into place. The rename is
    /// the only moment the file is visible under its final name.
    pub async fn write_atomic(&self, relative: &str, content: &[u8]) -> Result<PathBuf, CoreError> {
        let target = self.resolve(relative)?;
        let content = content.to_vec();
        let display = relative.to_string();
        let path = target.clone();
        tokio::task::spawn_blocking(move || {
            let io_denied = |e: std::io::Error| CoreError::SandboxDenied {
                path: format!("{display}: {e}"),
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_denied)?;
            }
            let stage = path.with_extension(format!("stage-{}", uuid::Uuid::new_v4()));
            std::fs::write(&stage, &content).map_err(io_denied)?;
            std::fs::rename(&stage, &path).map_err(|e| {
                let _ = std::fs::remove_file(&stage);
                io_denied(e)
            })?;
            Ok(path)
        })
        .await
        .map_err(|e| CoreError::SandboxDenied {
            path: format!("{relative}: {e}"),
        })?
    }
}

/// Maps a request to its project sandbox under a base directory:
/// `{base}/{workspace_id}/{project_id}` (`_workspace` when no project).
#[derive(Clone, Debug)]
pub struct SandboxLayout {
    base: PathBuf,
}

impl SandboxLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn sandbox_for(&self, ctx: &ExecutionContext) -> Result<Sandbox, CoreError> {
        let project = ctx.project_id().unwrap_or("_workspace");
        Sandbox::new(self.base.join(ctx.workspace_id()).join(project))
    }
}

/// Local artifact store: sandboxed write plus registration row, atomic together.
pub struct LocalArtifactStore {
    layout: SandboxLayout,
    rows: Arc<dyn ArtifactStore>,
}

impl LocalArtifactStore {
    pub fn new(layout: SandboxLayout, rows: Arc<dyn ArtifactStore>) -> Self {
        Self { layout, rows }
    }
}

#[async_trait]
impl ArtifactStorePort for LocalArtifactStore {
    async fn write(
        &self,
        ctx: &ExecutionContext,
        session_id: &str,
        relative_path: &str,
        content: &[u8],
        mime: &str,
        summary: &str,
        _idempotency_key: &str,
    ) -> Result<Artifact, CoreError> {
        // Same (session, path) means the same step emitted it: return the
        // existing registration instead of writing a second time.
        if let Some(existing) = self
            .rows
            .find_by_path(ctx.workspace_id(), session_id, relative_path)
            .await?
        {
            return Ok(existing);
        }

        let sandbox = self.layout.sandbox_for(ctx)?;
        let written = sandbox.write_atomic(relative_path, content).await?;

        let artifact = Artifact {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: ctx.workspace_id().to_string(),
            session_id: session_id.to_string(),
            path: relative_path.to_string(),
            mime: mime.to_string(),
            summary: summary.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.rows.insert(&artifact).await {
            // Roll the write back so file and registry stay in step.
            let _ = std::fs::remove_file(&written);
            return Err(e.into());
        }
        Ok(artifact)
    }

    async fn list(
        &self,
        ctx: &ExecutionContext,
        session_id: &str,
    ) -> Result<Vec<Artifact>, CoreError> {
        Ok(self
            .rows
            .list_by_session(ctx.workspace_id(), session_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenancyMode;
    use crate::store::StoreSet;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u-1", "ws-1", TenancyMode::Local).with_project_id("proj-1")
    }

    #[test]
    fn resolve_denies_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().join("proj")).unwrap();
        for bad in ["../outside.md", "/etc/passwd", "", "a/../../b.md"] {
            let err = sandbox.resolve(bad).unwrap_err();
            assert_eq!(err.code(), "sandbox_denied", "path {bad:?} must be denied");
        }
        assert!(sandbox.resolve("artifacts/plan.md").is_ok());
    }

    #[tokio::test]
    async fn write_atomic_creates_parents_and_no_stage_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().join("proj")).unwrap();
        let path = sandbox
            .write_atomic("artifacts/content_plan.md", b"# Plan")
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Plan");
        let siblings: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings.len(), 1, "no staging files left: {siblings:?}");
    }

    #[tokio::test]
    async fn registered_path_stays_under_sandbox_root() {
        let dir = tempfile::tempdir().unwrap();
        let stores = StoreSet::in_memory();
        let store = LocalArtifactStore::new(SandboxLayout::new(dir.path()), stores.artifacts);
        let artifact = store
            .write(&ctx(), "sess-1", "artifacts/plan.md", b"x", "text/markdown", "plan", "k1")
            .await
            .unwrap();
        let root = dir.path().join("ws-1").join("proj-1");
        assert!(root.join(&artifact.path).starts_with(&root));
    }

    /// **Scenario**: a second emit with the same (session, path) is a no-op
    /// returning the original registration.
    #[tokio::test]
    async fn second_write_same_path_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let stores = StoreSet::in_memory();
        let store = LocalArtifactStore::new(SandboxLayout::new(dir.path()), stores.artifacts);
        let first = store
            .write(&ctx(), "sess-1", "artifacts/plan.md", b"v1", "text/markdown", "plan", "k1")
            .await
            .unwrap();
        let second = store
            .write(&ctx(), "sess-1", "artifacts/plan.md", b"v2", "text/markdown", "plan", "k1")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        // Content stays from the first effective write.
        let on_disk = std::fs::read_to_string(
            dir.path().join("ws-1").join("proj-1").join("artifacts/plan.md"),
        )
        .unwrap();
        assert_eq!(on_disk, "v1");
    }
}
