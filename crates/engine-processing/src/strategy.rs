use engine_config::FetchOptions;
use model::plan::{Estimate, FetchPlan, Strategy, Thresholds};

/// Maps an estimated size and an optional override to a strategy.
///
/// Both thresholds are inclusive-low: an estimate equal to `small` is still
/// fetched in one call, one equal to `large` is still paginated sequentially.
pub fn select(
    estimate: Estimate,
    strategy_override: Option<Strategy>,
    thresholds: &Thresholds,
) -> Strategy {
    if let Some(strategy) = strategy_override {
        return strategy;
    }

    match estimate {
        Estimate::Unknown => Strategy::SequentialPaginate,
        Estimate::Known(rows) if rows <= thresholds.small => Strategy::Single,
        Estimate::Known(rows) if rows <= thresholds.large => Strategy::SequentialPaginate,
        Estimate::Known(_) => Strategy::ParallelPaginate,
    }
}

/// Builds the immutable plan for one fetch. Queries the upstream cannot
/// window are always fetched in a single call.
pub fn plan(estimate: Estimate, options: &FetchOptions, paginable: bool) -> FetchPlan {
    let strategy = if paginable {
        select(estimate, options.strategy, &options.thresholds)
    } else {
        Strategy::Single
    };

    let (page_size, worker_count) = match strategy {
        Strategy::Single => (options.single_row_cap(), 1),
        Strategy::SequentialPaginate => (options.page_size_for(strategy), 1),
        Strategy::ParallelPaginate => (options.page_size_for(strategy), options.workers),
    };

    FetchPlan {
        strategy,
        total_estimate: estimate,
        page_size,
        worker_count,
    }
}
