use crate::{
    error::{AuthError, QueryError},
    metabase::{
        SESSION_HEADER,
        models::{
            Card, CardQueryRequest, DatabaseList, DatasetRequest, DatasetResponse, LoginRequest,
            LoginResponse,
        },
    },
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tracing::debug;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MetabaseConfig {
    pub url: String,
    pub credentials: Credentials,
    /// Transport-level timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl MetabaseConfig {
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: Credentials {
                username: username.into(),
                password: password.into(),
            },
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Thin HTTP client over the Metabase REST endpoints used by the fetch engine.
#[derive(Clone)]
pub struct MetabaseClient {
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<Credentials>,
}

impl MetabaseClient {
    pub fn new(config: MetabaseConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            http,
            credentials: Arc::new(config.credentials),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Opens a session and returns its token.
    pub async fn login(&self) -> Result<String, AuthError> {
        let body = LoginRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
        };

        let resp = self
            .http
            .post(self.url("/api/session"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        login
            .id
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingSessionId)
    }

    pub async fn logout(&self, token: &str) -> Result<(), reqwest::Error> {
        self.http
            .delete(self.url("/api/session"))
            .header(SESSION_HEADER, token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Looks a database up by display name.
    pub async fn database_id(&self, token: &str, name: &str) -> Result<u64, AuthError> {
        let resp = self
            .http
            .get(self.url("/api/database"))
            .header(SESSION_HEADER, token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let list: DatabaseList = resp
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        list.into_vec()
            .into_iter()
            .find(|db| db.name == name)
            .map(|db| db.id)
            .ok_or_else(|| AuthError::DatabaseNotFound(name.to_string()))
    }

    pub async fn dataset(
        &self,
        token: &str,
        request: &DatasetRequest,
    ) -> Result<DatasetResponse, QueryError> {
        debug!(database = request.database, "POST /api/dataset");
        let resp = self
            .http
            .post(self.url("/api/dataset"))
            .header(SESSION_HEADER, token)
            .json(request)
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn card(&self, token: &str, id: u64) -> Result<Card, QueryError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/card/{id}")))
            .header(SESSION_HEADER, token)
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn card_query(
        &self,
        token: &str,
        id: u64,
        request: &CardQueryRequest,
    ) -> Result<DatasetResponse, QueryError> {
        debug!(card = id, "Running saved question");
        let resp = self
            .http
            .post(self.url(&format!("/api/card/{id}/query")))
            .header(SESSION_HEADER, token)
            .json(request)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, QueryError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(QueryError::Unauthorized);
    }

    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(QueryError::Status {
            status: status.as_u16(),
            message,
        });
    }

    resp.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            QueryError::Malformed(e.to_string())
        } else {
            QueryError::Transport(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client =
            MetabaseClient::new(MetabaseConfig::new("https://metabase.example/", "u", "p"))
                .unwrap();
        assert_eq!(client.base_url(), "https://metabase.example");
        assert_eq!(client.url("/api/session"), "https://metabase.example/api/session");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let config = MetabaseConfig::new("http://localhost", "analyst", "hunter2");
        let printed = format!("{config:?}");
        assert!(printed.contains("analyst"));
        assert!(!printed.contains("hunter2"));
    }
}
