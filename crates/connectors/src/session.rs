use crate::error::AuthError;
use async_trait::async_trait;
use model::query::DatabaseTarget;
use std::fmt::Debug;

/// One authenticated upstream session, bound to a single database.
///
/// Handles are owned by exactly one worker at a time and are returned to the
/// provider through [`SessionProvider::release`].
pub struct SessionHandle {
    id: u64,
    token: String,
    database_id: u64,
    target: DatabaseTarget,
}

impl SessionHandle {
    pub fn new(id: u64, token: String, database_id: u64, target: DatabaseTarget) -> Self {
        Self {
            id,
            token,
            database_id,
            target,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn database_id(&self) -> u64 {
        self.database_id
    }

    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }
}

impl Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .field("database_id", &self.database_id)
            .field("target", &self.target)
            .finish()
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Opens a new session against the given database.
    async fn acquire(&self, database: &DatabaseTarget) -> Result<SessionHandle, AuthError>;

    /// Closes a session. Never fails; problems are only logged.
    async fn release(&self, handle: SessionHandle);
}
