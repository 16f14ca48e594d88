use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    pages_fetched: AtomicU64,
    rows_fetched: AtomicU64,
    retries: AtomicU64,
    failed_pages: AtomicU64,
    session_refreshes: AtomicU64,
}

/// Counters shared by all workers of one fetch.
#[derive(Debug, Clone)]
pub struct FetchMetrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub pages_fetched: u64,
    pub rows_fetched: u64,
    pub retries: u64,
    pub failed_pages: u64,
    pub session_refreshes: u64,
}

impl FetchMetrics {
    pub fn new() -> Self {
        FetchMetrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn record_page(&self, rows: usize) {
        self.inner.pages_fetched.fetch_add(1, Ordering::Relaxed);
        self.inner
            .rows_fetched
            .fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed_pages(&self) {
        self.inner.failed_pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_session_refreshes(&self) {
        self.inner.session_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_fetched: self.inner.pages_fetched.load(Ordering::Relaxed),
            rows_fetched: self.inner.rows_fetched.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            failed_pages: self.inner.failed_pages.load(Ordering::Relaxed),
            session_refreshes: self.inner.session_refreshes.load(Ordering::Relaxed),
        }
    }
}

impl Default for FetchMetrics {
    fn default() -> Self {
        Self::new()
    }
}
