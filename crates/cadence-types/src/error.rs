use thiserror::Error;

/// Errors from repository operations (used by store traits in cadence-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from document collaborator operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid document name: {0}")]
    InvalidName(String),

    #[error("document I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_document_error_display() {
        let err = DocumentError::NotFound("prd.md".to_string());
        assert_eq!(err.to_string(), "document not found: prd.md");
    }
}
