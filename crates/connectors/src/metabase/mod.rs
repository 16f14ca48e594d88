//! Metabase-compatible implementation of the session and query boundaries.
//!
//! Sessions are opened with `POST /api/session` and carried in the
//! `X-Metabase-Session` header. Native queries go through `/api/dataset` and
//! are paginated by appending `LIMIT`/`OFFSET` to the SQL text, which keeps
//! every page below the service's display-row cap.

pub mod client;
pub mod models;
pub mod provider;
pub mod service;
pub mod sql;

pub use client::{Credentials, MetabaseClient, MetabaseConfig};
pub use provider::MetabaseSessionProvider;
pub use service::MetabaseQueryService;

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "X-Metabase-Session";
