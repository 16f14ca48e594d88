use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancels an operation when its overall timeout elapses.
pub struct Deadline {
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Deadline {
    pub fn start(timeout: Duration, cancel: CancellationToken) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = sleep(timeout) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Overall timeout elapsed; cancelling fetch");
                    flag.store(true, Ordering::SeqCst);
                    cancel.cancel();
                }
                _ = cancel.cancelled() => {}
            }
        });

        Self { fired, task }
    }

    /// Stops the timer and reports whether it fired.
    pub fn finish(self) -> bool {
        self.task.abort();
        self.fired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_cancels_when_elapsed() {
        let cancel = CancellationToken::new();
        let deadline = Deadline::start(Duration::from_millis(20), cancel.clone());

        cancel.cancelled().await;
        assert!(deadline.finish());
    }

    #[tokio::test]
    async fn test_finished_deadline_never_fires() {
        let cancel = CancellationToken::new();
        let deadline = Deadline::start(Duration::from_millis(20), cancel.clone());

        assert!(!deadline.finish());
        sleep(Duration::from_millis(50)).await;
        assert!(!cancel.is_cancelled());
    }
}
