use thiserror::Error;

/// Failures while establishing or refreshing an upstream session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Session response did not contain a session id")]
    MissingSessionId,

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Transport error during authentication: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed authentication response: {0}")]
    Malformed(String),

    #[error("Session provider error: {0}")]
    Provider(String),
}

/// Failures of a single upstream query call.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The session token expired or was revoked.
    #[error("Session expired or unauthorized")]
    Unauthorized,

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The upstream accepted the request but the query itself did not complete.
    #[error("Query finished with status '{status}': {message}")]
    Failed { status: String, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream call timed out")]
    Timeout,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
