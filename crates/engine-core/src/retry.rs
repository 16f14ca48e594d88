use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal(E),
    /// The error was retryable, but the configured attempts were exhausted.
    AttemptsExceeded(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::AttemptsExceeded(e) => e,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Policy allowing `retries` additional attempts after the first one.
    pub fn with_retries(retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(retries as usize + 1, base_delay, max_delay)
    }

    /// Executes the operation with the configured retry policy.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) => match classify(&err) {
                    RetryDisposition::Stop => return Err(RetryError::Fatal(err)),
                    RetryDisposition::Retry => {
                        if attempt + 1 >= self.max_attempts {
                            return Err(RetryError::AttemptsExceeded(err));
                        }

                        let delay = self.backoff_delay(attempt);
                        debug!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after failed attempt"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                },
            }
        }
    }

    /// Exponential delay after the given zero-based attempt, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let factor = 1u128 << attempt.min(6);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

/// Lifecycle of one page under a bounded-attempt policy:
/// `Pending -> InFlight -> {Success | Retrying -> InFlight | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    InFlight { attempt: usize },
    Retrying { attempt: usize, delay: Duration },
    Success { attempts: usize },
    Failed { attempts: usize },
}

impl PageState {
    /// Starts the next attempt. Terminal and in-flight states are unchanged.
    pub fn start(self) -> Self {
        match self {
            PageState::Pending => PageState::InFlight { attempt: 1 },
            PageState::Retrying { attempt, .. } => PageState::InFlight {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            PageState::InFlight { attempt } => PageState::Success { attempts: attempt },
            other => other,
        }
    }

    /// Records a failed attempt and decides between another attempt and giving up.
    pub fn fail(self, disposition: RetryDisposition, policy: &RetryPolicy) -> Self {
        match self {
            PageState::InFlight { attempt } => {
                if disposition == RetryDisposition::Stop || attempt >= policy.max_attempts {
                    PageState::Failed { attempts: attempt }
                } else {
                    PageState::Retrying {
                        attempt,
                        delay: policy.backoff_delay(attempt - 1),
                    }
                }
            }
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PageState::Success { .. } | PageState::Failed { .. })
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> usize {
        match self {
            PageState::Pending => 0,
            PageState::InFlight { attempt } | PageState::Retrying { attempt, .. } => *attempt,
            PageState::Success { attempts } | PageState::Failed { attempts } => *attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::from_millis(250))
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy(5);
        assert_eq!(p.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(250));
        assert_eq!(p.backoff_delay(9), Duration::from_millis(250));
    }

    #[test]
    fn test_with_retries_counts_first_attempt() {
        let p = RetryPolicy::with_retries(3, Duration::ZERO, Duration::ZERO);
        assert_eq!(p.max_attempts, 4);
        assert_eq!(p.backoff_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_page_state_retries_then_fails() {
        let p = policy(3);
        let mut state = PageState::Pending.start();
        assert_eq!(state, PageState::InFlight { attempt: 1 });

        state = state.fail(RetryDisposition::Retry, &p);
        assert_eq!(
            state,
            PageState::Retrying {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );

        state = state.start().fail(RetryDisposition::Retry, &p);
        assert!(matches!(state, PageState::Retrying { attempt: 2, .. }));

        state = state.start().fail(RetryDisposition::Retry, &p);
        assert_eq!(state, PageState::Failed { attempts: 3 });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_page_state_stop_fails_immediately() {
        let state = PageState::Pending
            .start()
            .fail(RetryDisposition::Stop, &policy(5));
        assert_eq!(state, PageState::Failed { attempts: 1 });
    }

    #[test]
    fn test_page_state_success_records_attempts() {
        let p = policy(3);
        let state = PageState::Pending
            .start()
            .fail(RetryDisposition::Retry, &p)
            .start()
            .succeed();
        assert_eq!(state, PageState::Success { attempts: 2 });
        assert_eq!(state.attempts(), 2);
        assert_eq!(state.start(), state);
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);

        let result: Result<usize, RetryError<&str>> = p
            .run(
                || {
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < 2 { Err("transient") } else { Ok(n) }
                    }
                },
                |_| RetryDisposition::Retry,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_fatal() {
        let p = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);
        let result: Result<(), RetryError<&str>> = p
            .run(|| async { Err("fatal") }, |_| RetryDisposition::Stop)
            .await;
        assert!(matches!(result, Err(RetryError::Fatal("fatal"))));
    }
}
