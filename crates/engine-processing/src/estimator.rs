use crate::{error::EstimationError, retry::classify_estimation_error};
use connectors::{session::SessionHandle, upstream::QueryService};
use engine_core::retry::{RetryError, RetryPolicy};
use model::{plan::Estimate, query::QuerySpec};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{info, warn};

/// Issues the count query ahead of planning.
pub struct SizeEstimator {
    service: Arc<dyn QueryService>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SizeEstimator {
    /// At most two attempts; the second failure yields [`Estimate::Unknown`].
    pub fn new(service: Arc<dyn QueryService>, timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            service,
            timeout,
            retry: RetryPolicy::new(2, retry_delay, retry_delay),
        }
    }

    pub async fn estimate(&self, handle: &SessionHandle, spec: &QuerySpec) -> Estimate {
        match self.try_estimate(handle, spec).await {
            Ok(rows) => {
                info!(rows, query = %spec.label(), "Estimated result size");
                Estimate::Known(rows)
            }
            Err(err) => {
                warn!(error = %err, query = %spec.label(), "Size estimation failed; size is unknown");
                Estimate::Unknown
            }
        }
    }

    pub async fn try_estimate(
        &self,
        handle: &SessionHandle,
        spec: &QuerySpec,
    ) -> Result<u64, EstimationError> {
        self.retry
            .run(
                || async {
                    match timeout(self.timeout, self.service.count(handle, spec)).await {
                        Ok(result) => result.map_err(EstimationError::from),
                        Err(_) => Err(EstimationError::Timeout(self.timeout)),
                    }
                },
                classify_estimation_error,
            )
            .await
            .map_err(RetryError::into_inner)
    }
}
