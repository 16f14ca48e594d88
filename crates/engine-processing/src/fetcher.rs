use crate::error::PageFetchError;
use connectors::{session::SessionHandle, upstream::QueryService};
use model::{
    page::{PageRequest, PageResult, QueryRows},
    query::QuerySpec,
};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Performs single upstream calls under the per-page timeout.
///
/// A fetch touches nothing but the handle it is given, so any number of
/// fetchers may run concurrently on distinct handles.
pub struct PageFetcher {
    service: Arc<dyn QueryService>,
    page_timeout: Duration,
}

impl PageFetcher {
    pub fn new(service: Arc<dyn QueryService>, page_timeout: Duration) -> Self {
        Self {
            service,
            page_timeout,
        }
    }

    pub async fn fetch(
        &self,
        handle: &SessionHandle,
        request: &PageRequest,
    ) -> Result<PageResult, PageFetchError> {
        let page = request.page_index;
        debug!(
            page,
            offset = request.offset(),
            limit = request.limit(),
            session = handle.id(),
            "Fetching page"
        );

        let call = self.service.query(handle, &request.spec, request.window);
        let rows = match timeout(self.page_timeout, call).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(source)) => return Err(PageFetchError::Query { page, source }),
            Err(_) => {
                return Err(PageFetchError::Timeout {
                    page,
                    timeout: self.page_timeout,
                });
            }
        };

        // A full window is reported as truncated by the upstream's own row cap.
        if rows.truncated && (rows.rows.len() as u64) < request.limit() {
            warn!(
                page,
                rows = rows.rows.len(),
                limit = request.limit(),
                "Upstream truncated a page below its window"
            );
        }

        let result = PageResult::from_rows(request, rows);
        debug!(page, rows = result.row_count, has_more = result.has_more, "Fetched page");
        Ok(result)
    }

    /// Runs the query without a window, capped at `max_rows` upstream.
    pub async fn fetch_unpaginated(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
        max_rows: u64,
    ) -> Result<QueryRows, PageFetchError> {
        debug!(max_rows, session = handle.id(), "Fetching unpaginated result");

        let call = self.service.query_all(handle, spec, max_rows);
        match timeout(self.page_timeout, call).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(source)) => Err(PageFetchError::Query { page: 0, source }),
            Err(_) => Err(PageFetchError::Timeout {
                page: 0,
                timeout: self.page_timeout,
            }),
        }
    }
}
