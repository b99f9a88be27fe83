//! Local filesystem document store.
//!
//! Implements `DocumentStore` from `cadence-core` with documents stored at
//! `{base_dir}/{workflow_id}/{name}`. The handle returned by `save` is the
//! absolute file path.

use std::path::{Path, PathBuf};

use cadence_core::storage::document::{DocumentStore, validate_document_name};
use cadence_types::error::DocumentError;

/// Filesystem-backed document store.
///
/// ```text
/// {base_dir}/
///   greenfield/
///     brief.md
///     prd.md
///   brownfield/
///     notes/architecture.md
/// ```
pub struct FsDocumentStore {
    base_dir: PathBuf,
}

impl FsDocumentStore {
    /// Create a store rooted at `base_dir` (created lazily on first save).
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn document_path(&self, workflow_id: &str, name: &str) -> PathBuf {
        self.base_dir.join(workflow_id).join(name)
    }

    /// Resolve a handle, refusing paths outside the base directory.
    fn resolve(&self, handle: &str) -> Result<PathBuf, DocumentError> {
        let path = PathBuf::from(handle);
        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.base_dir) {
            return Err(DocumentError::NotFound(handle.to_string()));
        }
        Ok(path)
    }
}

impl DocumentStore for FsDocumentStore {
    async fn save(
        &self,
        workflow_id: &str,
        name: &str,
        content: &str,
    ) -> Result<String, DocumentError> {
        validate_document_name(workflow_id)?;
        validate_document_name(name)?;

        let path = self.document_path(workflow_id, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocumentError::Io(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| DocumentError::Io(format!("{}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "wrote document");
        Ok(path.display().to_string())
    }

    async fn load(&self, handle: &str) -> Result<String, DocumentError> {
        let path = self.resolve(handle)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DocumentError::NotFound(handle.to_string()))
            }
            Err(e) => Err(DocumentError::Io(format!("{handle}: {e}"))),
        }
    }

    async fn exists(&self, handle: &str) -> bool {
        match self.resolve(handle) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
