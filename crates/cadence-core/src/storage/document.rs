//! Document store trait.
//!
//! Documents are named text blobs produced and consumed by workflow steps.
//! `save` returns an opaque handle; the engine records it in
//! `Execution.documents` and later passes it back to `load`.
//! Implementations live in cadence-infra (filesystem) and here (in-memory).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use cadence_types::error::DocumentError;

/// Trait for per-workflow document storage.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait DocumentStore: Send + Sync {
    /// Persist `content` as document `name` for `workflow_id`, returning its handle.
    fn save(
        &self,
        workflow_id: &str,
        name: &str,
        content: &str,
    ) -> impl std::future::Future<Output = Result<String, DocumentError>> + Send;

    /// Read a document by handle.
    fn load(
        &self,
        handle: &str,
    ) -> impl std::future::Future<Output = Result<String, DocumentError>> + Send;

    /// Whether a handle refers to a stored document.
    fn exists(&self, handle: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// Reject names that could escape a workflow's namespace.
pub fn validate_document_name(name: &str) -> Result<(), DocumentError> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "..");
    if bad {
        Err(DocumentError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Document store keeping contents in memory under `mem://{workflow}/{name}`.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: Mutex<HashMap<String, String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly (e.g. inputs supplied before a run).
    pub fn insert(&self, handle: impl Into<String>, content: impl Into<String>) {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.into(), content.into());
    }
}

impl DocumentStore for InMemoryDocumentStore {
    async fn save(
        &self,
        workflow_id: &str,
        name: &str,
        content: &str,
    ) -> Result<String, DocumentError> {
        validate_document_name(name)?;
        let handle = format!("mem://{workflow_id}/{name}");
        self.insert(handle.clone(), content);
        Ok(handle)
    }

    async fn load(&self, handle: &str) -> Result<String, DocumentError> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(handle.to_string()))
    }

    async fn exists(&self, handle: &str) -> bool {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_exists() {
        let store = InMemoryDocumentStore::new();
        let handle = store.save("wf", "brief.md", "hello").await.unwrap();
        assert_eq!(handle, "mem://wf/brief.md");
        assert!(store.exists(&handle).await);
        assert_eq!(store.load(&handle).await.unwrap(), "hello");
        assert!(!store.exists("mem://wf/other.md").await);
        assert!(matches!(
            store.load("mem://wf/other.md").await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[test]
    fn test_document_name_validation() {
        assert!(validate_document_name("brief.md").is_ok());
        assert!(validate_document_name("docs/arch.md").is_ok());
        for bad in ["", "/etc/passwd", "../up.md", "a//b", "a\\b"] {
            assert!(validate_document_name(bad).is_err(), "{bad}");
        }
    }
}
