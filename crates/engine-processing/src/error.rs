use connectors::error::QueryError;
use std::time::Duration;
use thiserror::Error;

/// Failure of the size estimate. Never fatal: it degrades to an unknown estimate.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("Count query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Count query timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of one page fetch attempt.
#[derive(Debug, Error)]
pub enum PageFetchError {
    #[error("Page {page} failed: {source}")]
    Query {
        page: usize,
        #[source]
        source: QueryError,
    },

    #[error("Page {page} timed out after {timeout:?}")]
    Timeout { page: usize, timeout: Duration },
}

impl PageFetchError {
    pub fn page(&self) -> usize {
        match self {
            PageFetchError::Query { page, .. } | PageFetchError::Timeout { page, .. } => *page,
        }
    }

    /// The session behind the attempt is no longer valid.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            PageFetchError::Query {
                source: QueryError::Unauthorized,
                ..
            }
        )
    }

    pub fn into_query_error(self) -> QueryError {
        match self {
            PageFetchError::Query { source, .. } => source,
            PageFetchError::Timeout { .. } => QueryError::Timeout,
        }
    }
}
