use crate::execution::deadline::Deadline;
use chrono::Utc;
use connectors::{
    session::{SessionHandle, SessionProvider},
    upstream::{QueryService, ResolvedQuery},
};
use engine_config::FetchOptions;
use engine_core::{error::FetchError, metrics::FetchMetrics};
use engine_processing::{
    assembler::{AssembledRows, PageCollection, assemble},
    coordinator::ParallelCoordinator,
    estimator::SizeEstimator,
    fetcher::PageFetcher,
    sequential,
    strategy,
    worker::{Attempt, PageWorker, WorkerContext},
};
use model::{
    outcome::FetchOutcome,
    page::QueryRows,
    plan::{Estimate, FetchPlan, Strategy},
    query::QuerySpec,
};
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc, time::Instant};
use tracing::{debug, info, warn};

/// Fetches `spec` with the given options.
pub async fn fetch(
    provider: Arc<dyn SessionProvider>,
    service: Arc<dyn QueryService>,
    spec: QuerySpec,
    options: FetchOptions,
) -> Result<FetchOutcome, FetchError> {
    WarehouseFetcher::new(provider, service)
        .fetch(spec, options)
        .await
}

/// Plan that a fetch would follow, without fetching any rows.
#[derive(Debug, Clone, Serialize)]
pub struct FetchPreview {
    pub query: String,
    pub database: String,
    pub paginable: bool,
    pub plan: FetchPlan,
}

pub struct WarehouseFetcher {
    provider: Arc<dyn SessionProvider>,
    service: Arc<dyn QueryService>,
}

struct Execution {
    plan: FetchPlan,
    assembled: AssembledRows,
    cancelled: bool,
    truncated: bool,
}

impl Execution {
    fn single(plan: FetchPlan, rows: QueryRows) -> Self {
        if rows.truncated {
            warn!(rows = rows.rows.len(), cap = plan.page_size, "Upstream truncated the result");
        }

        Self {
            plan,
            truncated: rows.truncated,
            cancelled: false,
            assembled: AssembledRows {
                columns: rows.columns,
                rows: rows.rows,
                pages_fetched: 1,
                ..Default::default()
            },
        }
    }

    fn abandoned(plan: FetchPlan) -> Self {
        Self {
            plan,
            truncated: false,
            cancelled: true,
            assembled: AssembledRows {
                abandoned_pages: BTreeSet::from([0]),
                ..Default::default()
            },
        }
    }
}

impl WarehouseFetcher {
    pub fn new(provider: Arc<dyn SessionProvider>, service: Arc<dyn QueryService>) -> Self {
        Self { provider, service }
    }

    /// Resolves and estimates the query, then reports the plan.
    pub async fn preview(
        &self,
        spec: &QuerySpec,
        options: &FetchOptions,
    ) -> Result<FetchPreview, FetchError> {
        options
            .validate()
            .map_err(|e| FetchError::Settings(e.to_string()))?;

        let handle = self.provider.acquire(&spec.database).await?;
        let prepared = self.prepare(&handle, spec, options).await;
        self.provider.release(handle).await;

        let (resolved, plan) = prepared?;
        Ok(FetchPreview {
            query: spec.label(),
            database: spec.database.to_string(),
            paginable: resolved.paginable,
            plan,
        })
    }

    pub async fn fetch(
        &self,
        spec: QuerySpec,
        options: FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        options
            .validate()
            .map_err(|e| FetchError::Settings(e.to_string()))?;

        let started_at = Utc::now();
        let start = Instant::now();
        let cancel = options.cancel.child_token();
        let deadline = options
            .overall_timeout
            .map(|timeout| Deadline::start(timeout, cancel.clone()));

        let metrics = FetchMetrics::new();
        let ctx = WorkerContext {
            provider: self.provider.clone(),
            fetcher: Arc::new(PageFetcher::new(self.service.clone(), options.page_timeout)),
            retry: options.retry_policy(),
            metrics: metrics.clone(),
            cancel,
            database: spec.database.clone(),
        };

        info!(query = %spec.label(), database = %spec.database, "Starting fetch");
        let result = self.execute(spec, &options, ctx).await;
        let timed_out = deadline.is_some_and(Deadline::finish);

        let Execution {
            plan,
            assembled,
            cancelled,
            truncated,
        } = result?;
        let snapshot = metrics.snapshot();

        let outcome = FetchOutcome {
            total_rows: assembled.rows.len(),
            columns: assembled.columns,
            rows: assembled.rows,
            strategy_used: plan.strategy,
            plan,
            elapsed: start.elapsed(),
            started_at,
            failed_pages: assembled.failed_pages,
            abandoned_pages: assembled.abandoned_pages,
            cancelled,
            timed_out: timed_out && cancelled,
            truncated,
            pages_fetched: assembled.pages_fetched,
            retries: snapshot.retries,
        };

        info!(
            strategy = %outcome.strategy_used,
            rows = outcome.total_rows,
            pages = outcome.pages_fetched,
            retries = outcome.retries,
            session_refreshes = snapshot.session_refreshes,
            failed_pages = outcome.failed_pages.len(),
            cancelled = outcome.cancelled,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Fetch completed"
        );
        Ok(outcome)
    }

    async fn execute(
        &self,
        spec: QuerySpec,
        options: &FetchOptions,
        ctx: WorkerContext,
    ) -> Result<Execution, FetchError> {
        let handle = self.provider.acquire(&spec.database).await?;
        let (resolved, plan) = match self.prepare(&handle, &spec, options).await {
            Ok(prepared) => prepared,
            Err(err) => {
                self.provider.release(handle).await;
                return Err(err);
            }
        };

        let spec = Arc::new(resolved.spec);
        let mut control = PageWorker::with_handle(0, ctx.clone(), handle);

        match plan.strategy {
            Strategy::Single => {
                let attempt = control.fetch_unpaginated(&spec, plan.page_size).await;
                control.finish().await;
                match attempt? {
                    Attempt::Fetched(rows) => Ok(Execution::single(plan, rows)),
                    Attempt::Failed(err) => Err(FetchError::Query(err.into_query_error())),
                    Attempt::Abandoned => Ok(Execution::abandoned(plan)),
                }
            }
            Strategy::SequentialPaginate => {
                let collection = sequential::paginate(&mut control, spec, &plan, &ctx.cancel).await;
                control.finish().await;
                paginated(plan, collection?)
            }
            Strategy::ParallelPaginate => {
                // Workers open their own sessions.
                control.finish().await;
                let collection = ParallelCoordinator::new(ctx).run(spec, &plan).await?;
                paginated(plan, collection)
            }
        }
    }

    async fn prepare(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
        options: &FetchOptions,
    ) -> Result<(ResolvedQuery, FetchPlan), FetchError> {
        let resolved = self.service.resolve(handle, spec).await?;
        if !resolved.paginable {
            info!(query = %spec.label(), "Query cannot be paginated; fetching in one call");
        }

        // A paginated fetch uses the estimate to bound its pages even when forced.
        let estimate = if options.strategy == Some(Strategy::Single) || !resolved.paginable {
            debug!("Skipping size estimation");
            Estimate::Unknown
        } else {
            SizeEstimator::new(
                self.service.clone(),
                options.estimate_timeout,
                options.retry_base_delay,
            )
            .estimate(handle, &resolved.spec)
            .await
        };

        let plan = strategy::plan(estimate, options, resolved.paginable);
        info!(
            strategy = %plan.strategy,
            estimate = %plan.total_estimate,
            page_size = plan.page_size,
            workers = plan.worker_count,
            "Selected fetch strategy"
        );
        Ok((resolved, plan))
    }
}

fn paginated(plan: FetchPlan, collection: PageCollection) -> Result<Execution, FetchError> {
    let cancelled = collection.cancelled;
    Ok(Execution {
        plan,
        assembled: assemble(collection)?,
        cancelled,
        truncated: false,
    })
}
