use crate::{
    assembler::PageCollection,
    retry::MAX_TRAILING_FAILURES,
    worker::{Attempt, PageWorker, WorkerContext},
};
use engine_core::error::FetchError;
use model::{
    page::{PageRequest, PageResult},
    plan::FetchPlan,
    query::QuerySpec,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, Notify},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, PartialEq, Eq)]
enum Claim {
    Page(usize),
    /// Nothing to claim yet, but an in-flight page may still extend the range.
    Wait,
    Done,
}

/// Work queue and results map shared by the worker pool.
///
/// `end` is the exclusive frontier of page indices. With a known page count it
/// starts at that count; a full or failed last page extends it by one probe
/// page, and a full probe page switches to open-ended discovery. Only a short
/// page closes the frontier, right after itself. Results at or above the
/// frontier are discarded.
///
/// A failed page never closes the frontier. While open-ended, a run of
/// [`MAX_TRAILING_FAILURES`] failed pages with nothing fetched above it stalls
/// discovery at the pages already claimed; a full page at the stalled
/// frontier resumes it.
#[derive(Debug, Default)]
struct PageBoard {
    next: usize,
    end: Option<usize>,
    probing: bool,
    open_ended: bool,
    stalled: bool,
    in_flight: usize,
    pages: BTreeMap<usize, PageResult>,
    failed: BTreeSet<usize>,
}

impl PageBoard {
    fn new(known_pages: Option<usize>) -> Self {
        match known_pages {
            Some(pages) => Self {
                end: Some(pages.max(1)),
                ..Default::default()
            },
            None => Self {
                open_ended: true,
                ..Default::default()
            },
        }
    }

    fn claim(&mut self) -> Claim {
        if self.end.is_some_and(|end| self.next >= end) {
            return if (!self.open_ended || self.stalled) && self.in_flight > 0 {
                Claim::Wait
            } else {
                Claim::Done
            };
        }

        let page = self.next;
        self.next += 1;
        self.in_flight += 1;
        Claim::Page(page)
    }

    fn complete(&mut self, page: PageResult) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let index = page.page_index;
        if self.beyond_end(index) {
            debug!(page = index, "Discarding page beyond the end of the result");
            return;
        }

        let has_more = page.has_more;
        self.pages.insert(index, page);

        let at_end = self.end == Some(index + 1);
        if !has_more {
            self.stalled = false;
            self.close_at(index + 1);
        } else if at_end && self.stalled {
            info!(page = index, "Page above the failed run was full; resuming discovery");
            self.stalled = false;
            self.end = None;
        } else if at_end && !self.open_ended {
            self.extend_tail(index);
        }
    }

    /// Records a page that exhausted its retries. The remaining pages are still fetched.
    fn fail(&mut self, index: usize) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.beyond_end(index) {
            return;
        }

        self.failed.insert(index);
        if !self.open_ended {
            if self.end == Some(index + 1) {
                self.extend_tail(index);
            }
        } else if self.end.is_none() && self.trailing_failures(index) >= MAX_TRAILING_FAILURES {
            warn!(
                page = index,
                failures = MAX_TRAILING_FAILURES,
                "Consecutive pages failed; not discovering further pages"
            );
            self.end = Some(self.next);
            self.stalled = true;
        }
    }

    /// Length of the run of failed pages ending at `index`, or zero when a
    /// page above it was fetched.
    fn trailing_failures(&self, index: usize) -> usize {
        if self.pages.range(index + 1..).next().is_some() {
            return 0;
        }
        (0..=index)
            .rev()
            .take_while(|i| self.failed.contains(i))
            .count()
    }

    fn abandon(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn beyond_end(&self, index: usize) -> bool {
        self.end.is_some_and(|end| index >= end)
    }

    fn extend_tail(&mut self, last: usize) {
        if self.probing {
            info!(page = last, "Confirmation page did not end the result; continuing open-ended");
            self.end = None;
            self.open_ended = true;
        } else {
            debug!(page = last + 1, "Last estimated page did not end the result; probing one more");
            self.end = Some(last + 2);
            self.probing = true;
        }
    }

    fn close_at(&mut self, frontier: usize) {
        let end = self.end.map_or(frontier, |end| end.min(frontier));
        self.end = Some(end);
        self.pages.split_off(&end);
        self.failed.split_off(&end);
    }

    fn into_collection(self, cancelled: bool) -> PageCollection {
        PageCollection {
            expected_pages: self.end.unwrap_or(self.next),
            pages: self.pages,
            failed: self.failed,
            cancelled,
        }
    }
}

/// Fans pages out over a fixed pool of workers, each with its own session.
pub struct ParallelCoordinator {
    ctx: WorkerContext,
}

impl ParallelCoordinator {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        spec: Arc<QuerySpec>,
        plan: &FetchPlan,
    ) -> Result<PageCollection, FetchError> {
        let known_pages = plan.page_count();
        let pool_size = match known_pages {
            Some(pages) => plan.worker_count.min(pages.max(1)),
            None => plan.worker_count,
        }
        .max(1);

        info!(
            workers = pool_size,
            pages = ?known_pages,
            page_size = plan.page_size,
            "Starting parallel fetch"
        );

        let board = Arc::new(Mutex::new(PageBoard::new(known_pages)));
        let notify = Arc::new(Notify::new());
        let pool_cancel = self.ctx.cancel.child_token();

        let mut workers = JoinSet::new();
        for id in 0..pool_size {
            let task = WorkerTask {
                id,
                ctx: self.ctx.with_cancel(pool_cancel.clone()),
                board: board.clone(),
                notify: notify.clone(),
                spec: spec.clone(),
                page_size: plan.page_size,
            };
            workers.spawn(task.run());
        }

        let mut fatal: Option<FetchError> = None;
        while let Some(joined) = workers.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => Err(FetchError::from(join_err)),
            };

            if let Err(err) = result
                && fatal.is_none()
            {
                error!(error = %err, "Worker failed; stopping the pool");
                pool_cancel.cancel();
                notify.notify_waiters();
                fatal = Some(err);
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        let cancelled = self.ctx.cancel.is_cancelled();
        let board = std::mem::take(&mut *board.lock().await);
        let collection = board.into_collection(cancelled);

        info!(
            pages = collection.pages.len(),
            failed = collection.failed.len(),
            expected = collection.expected_pages,
            cancelled,
            "Parallel fetch finished"
        );
        Ok(collection)
    }
}

struct WorkerTask {
    id: usize,
    ctx: WorkerContext,
    board: Arc<Mutex<PageBoard>>,
    notify: Arc<Notify>,
    spec: Arc<QuerySpec>,
    page_size: u64,
}

impl WorkerTask {
    async fn run(self) -> Result<(), FetchError> {
        let mut worker = PageWorker::connect(self.id, self.ctx.clone()).await?;
        let result = self.drive(&mut worker).await;
        worker.finish().await;
        result
    }

    async fn drive(&self, worker: &mut PageWorker) -> Result<(), FetchError> {
        let mut fetched = 0usize;

        loop {
            if self.ctx.cancel.is_cancelled() {
                break;
            }

            // Register for wakeups before releasing the lock so no completion is missed.
            let (claim, notified) = {
                let mut board = self.board.lock().await;
                (board.claim(), self.notify.notified())
            };

            let index = match claim {
                Claim::Page(index) => index,
                Claim::Wait => {
                    tokio::select! {
                        _ = notified => continue,
                        _ = self.ctx.cancel.cancelled() => break,
                    }
                }
                Claim::Done => break,
            };

            let request = PageRequest::new(self.spec.clone(), index, self.page_size);
            let attempt = worker.fetch_page(&request).await;

            let mut board = self.board.lock().await;
            let result = match attempt {
                Ok(Attempt::Fetched(page)) => {
                    fetched += 1;
                    board.complete(page);
                    Ok(())
                }
                Ok(Attempt::Failed(_)) => {
                    board.fail(index);
                    Ok(())
                }
                Ok(Attempt::Abandoned) => {
                    board.abandon();
                    Ok(())
                }
                Err(err) => {
                    board.abandon();
                    Err(err)
                }
            };
            drop(board);
            self.notify.notify_waiters();
            result?;
        }

        debug!(worker = self.id, pages = fetched, "Worker finished");
        Ok(())
    }
}
