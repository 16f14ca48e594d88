use crate::error::SettingsError;
use engine_core::retry::RetryPolicy;
use model::plan::{Strategy, Thresholds};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SEQUENTIAL_PAGE_SIZE: u64 = 25_000;
pub const DEFAULT_PARALLEL_PAGE_SIZE: u64 = 50_000;
pub const DEFAULT_WORKERS: usize = 6;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_SINGLE_MAX_ROWS: u64 = 100_000;

/// Runtime options for one top-level fetch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub thresholds: Thresholds,
    /// Forced strategy; skips estimation when set.
    pub strategy: Option<Strategy>,
    /// Rows per page. `None` picks the strategy's default.
    pub page_size: Option<u64>,
    /// Parallel worker pool size.
    pub workers: usize,
    /// Retries after the first attempt of a page.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub page_timeout: Duration,
    pub estimate_timeout: Duration,
    /// Whole-operation deadline. Expiry cancels the fetch.
    pub overall_timeout: Option<Duration>,
    /// Upstream row cap for the Single strategy.
    pub single_max_rows: u64,
    pub cancel: CancellationToken,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            strategy: None,
            page_size: None,
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_RETRIES,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(5),
            page_timeout: Duration::from_secs(300),
            estimate_timeout: Duration::from_secs(60),
            overall_timeout: None,
            single_max_rows: DEFAULT_SINGLE_MAX_ROWS,
            cancel: CancellationToken::new(),
        }
    }
}

impl FetchOptions {
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_estimate_timeout(mut self, timeout: Duration) -> Self {
        self.estimate_timeout = timeout;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout);
        self
    }

    pub fn with_single_max_rows(mut self, rows: u64) -> Self {
        self.single_max_rows = rows;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(
            self.max_retries,
            self.retry_base_delay,
            self.retry_max_delay,
        )
    }

    /// Page size used for the given strategy.
    pub fn page_size_for(&self, strategy: Strategy) -> u64 {
        match (self.page_size, strategy) {
            (Some(size), _) => size,
            (None, Strategy::ParallelPaginate) => DEFAULT_PARALLEL_PAGE_SIZE,
            (None, _) => DEFAULT_SEQUENTIAL_PAGE_SIZE,
        }
    }

    /// Row cap for the Single strategy, never below the small threshold.
    pub fn single_row_cap(&self) -> u64 {
        self.single_max_rows.max(self.thresholds.small)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.page_size == Some(0) {
            return Err(SettingsError::invalid("page_size", "must be positive"));
        }
        if self.workers == 0 {
            return Err(SettingsError::invalid("workers", "must be positive"));
        }
        if self.thresholds.small > self.thresholds.large {
            return Err(SettingsError::invalid(
                "thresholds",
                format!(
                    "small threshold {} exceeds large threshold {}",
                    self.thresholds.small, self.thresholds.large
                ),
            ));
        }
        if self.page_timeout.is_zero() {
            return Err(SettingsError::invalid("page_timeout", "must be non-zero"));
        }
        if self.estimate_timeout.is_zero() {
            return Err(SettingsError::invalid("estimate_timeout", "must be non-zero"));
        }
        if self.overall_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SettingsError::invalid("overall_timeout", "must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = FetchOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.retry_policy().max_attempts, 4);
        assert_eq!(options.single_row_cap(), 100_000);
    }

    #[test]
    fn test_page_size_defaults_per_strategy() {
        let options = FetchOptions::default();
        assert_eq!(options.page_size_for(Strategy::SequentialPaginate), 25_000);
        assert_eq!(options.page_size_for(Strategy::ParallelPaginate), 50_000);

        let options = options.with_page_size(10);
        assert_eq!(options.page_size_for(Strategy::ParallelPaginate), 10);
    }

    #[test]
    fn test_single_row_cap_is_clamped_to_small_threshold() {
        let options = FetchOptions::default().with_single_max_rows(10);
        assert_eq!(options.single_row_cap(), Thresholds::DEFAULT_SMALL);
    }

    #[test]
    fn test_rejects_zero_workers_and_inverted_thresholds() {
        let err = FetchOptions::default().with_workers(0).validate();
        assert!(matches!(err, Err(SettingsError::Invalid { field: "workers", .. })));

        let err = FetchOptions::default()
            .with_thresholds(Thresholds { small: 10, large: 5 })
            .validate();
        assert!(matches!(err, Err(SettingsError::Invalid { field: "thresholds", .. })));
    }
}
