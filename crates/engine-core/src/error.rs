use connectors::error::{AuthError, QueryError};
use thiserror::Error;

/// Whole-operation failures. Page-level problems never surface here; they are
/// absorbed into the outcome's failed pages.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No session could be acquired or refreshed.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Two pages disagree on their column set.
    #[error("Schema mismatch on page {page}: expected columns {expected:?}, found {found:?}")]
    SchemaMismatch {
        page: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// The single unpaginated call failed after its retries.
    #[error("Query failed: {0}")]
    Query(#[from] QueryError),

    /// Options rejected at the start of the operation.
    #[error("Invalid fetch options: {0}")]
    Settings(String),

    /// A worker task panicked or was aborted.
    #[error("Worker task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Internal error: {0}")]
    Internal(String),
}
