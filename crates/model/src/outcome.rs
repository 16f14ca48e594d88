use crate::{
    page::{Column, Record},
    plan::{FetchPlan, Strategy},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeSet, time::Duration};

/// Final, possibly partial, result of one top-level fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub columns: Vec<Column>,
    pub rows: Vec<Record>,
    pub total_rows: usize,
    pub strategy_used: Strategy,
    pub plan: FetchPlan,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    /// Pages that exhausted their retries.
    pub failed_pages: BTreeSet<usize>,
    /// Pages that were never fetched because the operation was cancelled.
    pub abandoned_pages: BTreeSet<usize>,
    pub cancelled: bool,
    pub timed_out: bool,
    /// The upstream capped an unpaginated result.
    pub truncated: bool,
    pub pages_fetched: usize,
    pub retries: u64,
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed_pages.is_empty() || self.cancelled || self.truncated
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
