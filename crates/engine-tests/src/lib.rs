#![allow(dead_code)]

use crate::mock::MockWarehouse;
use engine_config::FetchOptions;
use engine_core::error::FetchError;
use engine_runtime::WarehouseFetcher;
use model::{
    outcome::FetchOutcome,
    plan::{Strategy, Thresholds},
    query::{DatabaseTarget, QuerySpec, Team},
};
use std::{sync::Arc, time::Duration};

pub mod metabase;
pub mod mock;

const TEST_SQL: &str = "SELECT id, name FROM events ORDER BY id";

fn spec() -> QuerySpec {
    QuerySpec::native(TEST_SQL, DatabaseTarget::Team(Team::Growth))
}

/// Options with fast retries and thresholds small enough for in-memory datasets.
fn options() -> FetchOptions {
    FetchOptions::default()
        .with_thresholds(Thresholds {
            small: 10,
            large: 50,
        })
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_page_timeout(Duration::from_secs(5))
        .with_estimate_timeout(Duration::from_secs(5))
}

fn forced(strategy: Strategy, page_size: u64) -> FetchOptions {
    options().with_strategy(strategy).with_page_size(page_size)
}

async fn run_fetch(
    warehouse: &Arc<MockWarehouse>,
    options: FetchOptions,
) -> Result<FetchOutcome, FetchError> {
    WarehouseFetcher::new(warehouse.clone(), warehouse.clone())
        .fetch(spec(), options)
        .await
}

fn ids(outcome: &FetchOutcome) -> Vec<u64> {
    outcome
        .rows
        .iter()
        .map(|r| r[0].as_u64().unwrap_or(u64::MAX))
        .collect()
}
