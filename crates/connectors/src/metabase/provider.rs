use crate::{
    error::AuthError,
    metabase::client::MetabaseClient,
    session::{SessionHandle, SessionProvider},
};
use async_trait::async_trait;
use model::query::DatabaseTarget;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Opens one Metabase session per handle.
///
/// Database ids are looked up by display name once and cached, so a pool of
/// workers does not repeat the lookup for every session it opens.
pub struct MetabaseSessionProvider {
    client: MetabaseClient,
    next_id: AtomicU64,
    database_ids: Mutex<HashMap<String, u64>>,
}

impl MetabaseSessionProvider {
    pub fn new(client: MetabaseClient) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
            database_ids: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve_database(
        &self,
        token: &str,
        target: &DatabaseTarget,
    ) -> Result<u64, AuthError> {
        let name = match target {
            DatabaseTarget::Id(id) => return Ok(*id),
            other => other.lookup_name().unwrap_or_default().to_string(),
        };

        let mut cache = self.database_ids.lock().await;
        if let Some(id) = cache.get(&name) {
            return Ok(*id);
        }

        let id = self.client.database_id(token, &name).await?;
        info!(database = %name, database_id = id, "Resolved database id");
        cache.insert(name, id);
        Ok(id)
    }
}

#[async_trait]
impl SessionProvider for MetabaseSessionProvider {
    async fn acquire(&self, database: &DatabaseTarget) -> Result<SessionHandle, AuthError> {
        let token = self.client.login().await?;

        let database_id = match self.resolve_database(&token, database).await {
            Ok(id) => id,
            Err(err) => {
                // The session is useless without a database; close it before bailing out.
                if let Err(logout_err) = self.client.logout(&token).await {
                    warn!("Logout after failed database lookup failed: {}", logout_err);
                }
                return Err(err);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, database_id, "Opened session");
        Ok(SessionHandle::new(id, token, database_id, database.clone()))
    }

    async fn release(&self, handle: SessionHandle) {
        match self.client.logout(handle.token()).await {
            Ok(()) => debug!(session = handle.id(), "Closed session"),
            Err(err) => warn!(session = handle.id(), "Logout failed: {}", err),
        }
    }
}
