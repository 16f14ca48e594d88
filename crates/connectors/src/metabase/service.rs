use crate::{
    error::QueryError,
    metabase::{
        client::MetabaseClient,
        models::{CardQueryRequest, Constraints, DatasetRequest, NativeQuery, count_from_rows},
        sql::{count_sql, paginated_sql, parameter_payloads, strip_terminator, template_tags},
    },
    session::SessionHandle,
    upstream::{QueryService, ResolvedQuery},
};
use async_trait::async_trait;
use model::{
    page::{PageWindow, QueryRows},
    query::{QueryParameter, QuerySource, QuerySpec},
};
use tracing::{info, warn};

pub struct MetabaseQueryService {
    client: MetabaseClient,
}

impl MetabaseQueryService {
    pub fn new(client: MetabaseClient) -> Self {
        Self { client }
    }

    async fn run_native(
        &self,
        handle: &SessionHandle,
        sql: String,
        params: &[QueryParameter],
        max_rows: u64,
    ) -> Result<QueryRows, QueryError> {
        let request = DatasetRequest {
            kind: "native",
            native: NativeQuery {
                query: sql,
                template_tags: template_tags(params),
            },
            database: handle.database_id(),
            parameters: parameter_payloads(params),
            constraints: Constraints::capped_at(max_rows),
        };

        self.client
            .dataset(handle.token(), &request)
            .await?
            .into_rows()
    }
}

#[async_trait]
impl QueryService for MetabaseQueryService {
    async fn resolve(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
    ) -> Result<ResolvedQuery, QueryError> {
        let (id, parameters) = match &spec.source {
            QuerySource::Native { .. } => return Ok(ResolvedQuery::paginable(spec.clone())),
            QuerySource::SavedQuestion { id, parameters } => (*id, parameters),
        };

        let card = self.client.card(handle.token(), id).await?;
        let name = card.name.clone().unwrap_or_else(|| "unnamed".to_string());

        match card.native_sql() {
            Some(sql) => {
                info!(question = id, name = %name, "Saved question is native SQL; paginating it directly");
                Ok(ResolvedQuery::paginable(QuerySpec {
                    source: QuerySource::Native {
                        sql: strip_terminator(sql).to_string(),
                        parameters: parameters.clone(),
                    },
                    database: spec.database.clone(),
                }))
            }
            None => {
                warn!(question = id, name = %name, "Saved question is not native SQL; it cannot be paginated");
                Ok(ResolvedQuery::opaque(spec.clone()))
            }
        }
    }

    async fn count(&self, handle: &SessionHandle, spec: &QuerySpec) -> Result<u64, QueryError> {
        match &spec.source {
            QuerySource::Native { sql, parameters } => {
                let rows = self
                    .run_native(handle, count_sql(sql), parameters, 1)
                    .await?;
                count_from_rows(&rows)
            }
            QuerySource::SavedQuestion { id, .. } => Err(QueryError::Unsupported(format!(
                "cannot count opaque saved question {id}"
            ))),
        }
    }

    async fn query(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
        window: PageWindow,
    ) -> Result<QueryRows, QueryError> {
        match &spec.source {
            QuerySource::Native { sql, parameters } => {
                self.run_native(handle, paginated_sql(sql, window), parameters, window.limit)
                    .await
            }
            QuerySource::SavedQuestion { id, .. } => Err(QueryError::Unsupported(format!(
                "cannot paginate opaque saved question {id}"
            ))),
        }
    }

    async fn query_all(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
        max_rows: u64,
    ) -> Result<QueryRows, QueryError> {
        match &spec.source {
            QuerySource::Native { sql, parameters } => {
                self.run_native(handle, strip_terminator(sql).to_string(), parameters, max_rows)
                    .await
            }
            QuerySource::SavedQuestion { id, parameters } => {
                let request = CardQueryRequest {
                    parameters: parameter_payloads(parameters),
                };
                self.client
                    .card_query(handle.token(), *id, &request)
                    .await?
                    .into_rows()
            }
        }
    }
}
