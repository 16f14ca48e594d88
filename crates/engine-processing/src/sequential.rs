use crate::{
    assembler::PageCollection,
    retry::MAX_TRAILING_FAILURES,
    worker::{Attempt, PageWorker},
};
use engine_core::error::FetchError;
use model::{page::PageRequest, plan::FetchPlan, query::QuerySpec};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fetches pages one after another on a single session until a short page
/// ends the result.
///
/// A known estimate does not stop enumeration: a full page at the estimated
/// end is followed by one more page, which is empty when the estimate was
/// exact. A failed page is recorded and enumeration moves on to the next one.
/// Past the estimate, or without one, a run of [`MAX_TRAILING_FAILURES`]
/// failed pages ends enumeration.
pub async fn paginate(
    worker: &mut PageWorker,
    spec: Arc<QuerySpec>,
    plan: &FetchPlan,
    cancel: &CancellationToken,
) -> Result<PageCollection, FetchError> {
    let known_pages = plan.page_count();
    let mut collection = PageCollection::default();
    let mut index = 0;
    let mut trailing_failures = 0;

    info!(
        estimate = %plan.total_estimate,
        page_size = plan.page_size,
        "Starting sequential pagination"
    );

    loop {
        if cancel.is_cancelled() {
            collection.cancelled = true;
            break;
        }

        let request = PageRequest::new(spec.clone(), index, plan.page_size);
        match worker.fetch_page(&request).await? {
            Attempt::Fetched(page) => {
                trailing_failures = 0;
                let has_more = page.has_more;
                collection.insert(page);
                if !has_more {
                    break;
                }
            }
            Attempt::Failed(_) => {
                collection.failed.insert(index);
                trailing_failures += 1;
                if trailing_failures >= MAX_TRAILING_FAILURES
                    && known_pages.is_none_or(|pages| index + 1 >= pages)
                {
                    warn!(
                        page = index,
                        failures = trailing_failures,
                        "Consecutive pages failed; ending enumeration"
                    );
                    break;
                }
            }
            Attempt::Abandoned => {
                // The interrupted page is part of the expected range.
                collection.cancelled = true;
                index += 1;
                break;
            }
        }

        index += 1;
    }

    collection.expected_pages = if collection.cancelled {
        known_pages.unwrap_or(index).max(index)
    } else {
        index + 1
    };

    info!(
        pages = collection.pages.len(),
        failed = collection.failed.len(),
        cancelled = collection.cancelled,
        "Sequential pagination finished"
    );
    Ok(collection)
}
