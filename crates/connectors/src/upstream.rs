use crate::{error::QueryError, session::SessionHandle};
use async_trait::async_trait;
use model::{
    page::{PageWindow, QueryRows},
    query::QuerySpec,
};

/// A query after the upstream has been consulted about its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub spec: QuerySpec,
    /// Whether offset/limit windows can be applied to the query.
    pub paginable: bool,
}

impl ResolvedQuery {
    pub fn paginable(spec: QuerySpec) -> Self {
        Self {
            spec,
            paginable: true,
        }
    }

    pub fn opaque(spec: QuerySpec) -> Self {
        Self {
            spec,
            paginable: false,
        }
    }
}

/// Paginated query API of the warehouse service.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Resolves indirections such as saved questions. The default treats the
    /// query as paginable as-is.
    async fn resolve(
        &self,
        _handle: &SessionHandle,
        spec: &QuerySpec,
    ) -> Result<ResolvedQuery, QueryError> {
        Ok(ResolvedQuery::paginable(spec.clone()))
    }

    /// Runs a `COUNT(*)` wrapper around the query.
    async fn count(&self, handle: &SessionHandle, spec: &QuerySpec) -> Result<u64, QueryError>;

    /// Fetches one offset/limit window of the query.
    async fn query(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
        window: PageWindow,
    ) -> Result<QueryRows, QueryError>;

    /// Fetches the query without a window, capped at `max_rows` by the upstream.
    async fn query_all(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
        max_rows: u64,
    ) -> Result<QueryRows, QueryError>;
}
