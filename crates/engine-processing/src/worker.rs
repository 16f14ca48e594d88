use crate::{error::PageFetchError, fetcher::PageFetcher, retry::classify_page_error};
use async_trait::async_trait;
use connectors::{
    error::AuthError,
    session::{SessionHandle, SessionProvider},
};
use engine_core::{
    metrics::FetchMetrics,
    retry::{PageState, RetryPolicy},
};
use model::{
    page::{PageRequest, PageResult, QueryRows},
    query::{DatabaseTarget, QuerySpec},
};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a worker needs besides its own session.
#[derive(Clone)]
pub struct WorkerContext {
    pub provider: Arc<dyn SessionProvider>,
    pub fetcher: Arc<PageFetcher>,
    pub retry: RetryPolicy,
    pub metrics: FetchMetrics,
    pub cancel: CancellationToken,
    pub database: DatabaseTarget,
}

impl WorkerContext {
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

/// Terminal result of one page under the retry policy.
#[derive(Debug)]
pub enum Attempt<T> {
    Fetched(T),
    /// Retries exhausted, or the error was not retryable.
    Failed(PageFetchError),
    /// Cancellation was observed before the page could finish.
    Abandoned,
}

#[async_trait]
trait FetchCall: Send + Sync {
    type Output: Send;

    async fn call(
        &self,
        fetcher: &PageFetcher,
        handle: &SessionHandle,
    ) -> Result<Self::Output, PageFetchError>;
}

struct PageCall<'a>(&'a PageRequest);

#[async_trait]
impl<'a> FetchCall for PageCall<'a> {
    type Output = PageResult;

    async fn call(
        &self,
        fetcher: &PageFetcher,
        handle: &SessionHandle,
    ) -> Result<PageResult, PageFetchError> {
        fetcher.fetch(handle, self.0).await
    }
}

struct UnpaginatedCall<'a> {
    spec: &'a QuerySpec,
    max_rows: u64,
}

#[async_trait]
impl<'a> FetchCall for UnpaginatedCall<'a> {
    type Output = QueryRows;

    async fn call(
        &self,
        fetcher: &PageFetcher,
        handle: &SessionHandle,
    ) -> Result<QueryRows, PageFetchError> {
        fetcher
            .fetch_unpaginated(handle, self.spec, self.max_rows)
            .await
    }
}

/// Owns one session for its whole lifetime and drives pages through the
/// bounded retry state machine.
pub struct PageWorker {
    id: usize,
    ctx: WorkerContext,
    handle: Option<SessionHandle>,
}

impl PageWorker {
    pub async fn connect(id: usize, ctx: WorkerContext) -> Result<Self, AuthError> {
        let handle = ctx.provider.acquire(&ctx.database).await?;
        debug!(worker = id, session = handle.id(), "Worker acquired session");
        Ok(Self::with_handle(id, ctx, handle))
    }

    pub fn with_handle(id: usize, ctx: WorkerContext, handle: SessionHandle) -> Self {
        Self {
            id,
            ctx,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    pub async fn fetch_page(
        &mut self,
        request: &PageRequest,
    ) -> Result<Attempt<PageResult>, AuthError> {
        let attempt = self.run(request.page_index, PageCall(request)).await?;
        if let Attempt::Fetched(page) = &attempt {
            self.ctx.metrics.record_page(page.row_count);
        }
        Ok(attempt)
    }

    pub async fn fetch_unpaginated(
        &mut self,
        spec: &QuerySpec,
        max_rows: u64,
    ) -> Result<Attempt<QueryRows>, AuthError> {
        let attempt = self.run(0, UnpaginatedCall { spec, max_rows }).await?;
        if let Attempt::Fetched(rows) = &attempt {
            self.ctx.metrics.record_page(rows.rows.len());
        }
        Ok(attempt)
    }

    /// Releases the session back to the provider.
    pub async fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(worker = self.id, session = handle.id(), "Worker releasing session");
            self.ctx.provider.release(handle).await;
        }
    }

    async fn run<C: FetchCall>(
        &mut self,
        page: usize,
        call: C,
    ) -> Result<Attempt<C::Output>, AuthError> {
        let fetcher = self.ctx.fetcher.clone();
        let mut state = PageState::Pending;

        loop {
            if self.ctx.cancel.is_cancelled() {
                debug!(worker = self.id, page, "Cancelled before attempt");
                return Ok(Attempt::Abandoned);
            }

            if self.handle.is_none() {
                self.refresh_session().await?;
            }
            let Some(handle) = self.handle.as_ref() else {
                return Err(AuthError::Provider("worker has no session".to_string()));
            };

            state = state.start();
            let err = match call.call(&fetcher, handle).await {
                Ok(value) => {
                    state = state.succeed();
                    if state.attempts() > 1 {
                        info!(worker = self.id, page, attempts = state.attempts(), "Page recovered");
                    }
                    return Ok(Attempt::Fetched(value));
                }
                Err(err) => err,
            };

            state = state.fail(classify_page_error(&err), &self.ctx.retry);
            match state {
                PageState::Retrying { attempt, delay } => {
                    warn!(
                        worker = self.id,
                        page,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Page attempt failed; retrying"
                    );
                    self.ctx.metrics.increment_retries();

                    if err.is_unauthorized() {
                        self.refresh_session().await?;
                    }

                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => {
                            debug!(worker = self.id, page, "Cancelled during backoff");
                            return Ok(Attempt::Abandoned);
                        }
                        _ = sleep(delay) => {}
                    }
                }
                _ => {
                    warn!(
                        worker = self.id,
                        page,
                        attempts = state.attempts(),
                        error = %err,
                        "Page failed"
                    );
                    self.ctx.metrics.increment_failed_pages();
                    return Ok(Attempt::Failed(err));
                }
            }
        }
    }

    async fn refresh_session(&mut self) -> Result<(), AuthError> {
        if let Some(expired) = self.handle.take() {
            self.ctx.provider.release(expired).await;
        }

        match self.ctx.provider.acquire(&self.ctx.database).await {
            Ok(handle) => {
                info!(worker = self.id, session = handle.id(), "Session refreshed");
                self.ctx.metrics.increment_session_refreshes();
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!(worker = self.id, error = %err, "Failed to refresh session");
                Err(err)
            }
        }
    }
}
