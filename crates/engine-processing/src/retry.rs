use crate::error::{EstimationError, PageFetchError};
use connectors::error::QueryError;
use engine_core::retry::RetryDisposition;

/// Consecutive failed pages after which the end of an unknown-size result is
/// no longer searched for.
pub const MAX_TRAILING_FAILURES: usize = 3;

pub fn classify_query_error(err: &QueryError) -> RetryDisposition {
    match err {
        QueryError::Unauthorized => RetryDisposition::Retry,
        QueryError::Transport(_) => RetryDisposition::Retry,
        QueryError::Timeout => RetryDisposition::Retry,
        QueryError::Status { status, .. } => classify_status(*status),
        QueryError::Failed { .. } => RetryDisposition::Stop,
        QueryError::Malformed(_) => RetryDisposition::Stop,
        QueryError::Unsupported(_) => RetryDisposition::Stop,
    }
}

pub fn classify_page_error(err: &PageFetchError) -> RetryDisposition {
    match err {
        PageFetchError::Query { source, .. } => classify_query_error(source),
        PageFetchError::Timeout { .. } => RetryDisposition::Retry,
    }
}

/// Every estimation failure gets its single second chance.
pub fn classify_estimation_error(_err: &EstimationError) -> RetryDisposition {
    RetryDisposition::Retry
}

fn classify_status(status: u16) -> RetryDisposition {
    match status {
        408 | 425 | 429 => RetryDisposition::Retry,
        500..=599 => RetryDisposition::Retry,
        _ => RetryDisposition::Stop,
    }
}
