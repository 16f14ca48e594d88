use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Retrieval mode for one fetch operation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One unpaginated call.
    Single,
    /// Page after page on one session.
    SequentialPaginate,
    /// Pages pulled concurrently by a fixed worker pool.
    ParallelPaginate,
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Single => write!(f, "single"),
            Strategy::SequentialPaginate => write!(f, "sequential"),
            Strategy::ParallelPaginate => write!(f, "parallel"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Strategy::Single),
            "sequential" | "pagination" | "sequential_paginate" => {
                Ok(Strategy::SequentialPaginate)
            }
            "parallel" | "fast" | "parallel_paginate" => Ok(Strategy::ParallelPaginate),
            other => Err(format!("Unknown strategy: {other}")),
        }
    }
}

/// Row count estimate; `Unknown` when estimation failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Estimate {
    Known(u64),
    Unknown,
}

impl Estimate {
    pub fn known(&self) -> Option<u64> {
        match self {
            Estimate::Known(n) => Some(*n),
            Estimate::Unknown => None,
        }
    }

    /// Number of pages needed to cover the estimate.
    pub fn page_count(&self, page_size: u64) -> Option<usize> {
        self.known()
            .map(|total| total.div_ceil(page_size.max(1)) as usize)
    }
}

impl Display for Estimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Estimate::Known(n) => write!(f, "{n}"),
            Estimate::Unknown => write!(f, "unknown"),
        }
    }
}

/// Size boundaries between strategy tiers. Both bounds are inclusive-low.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub small: u64,
    pub large: u64,
}

impl Thresholds {
    pub const DEFAULT_SMALL: u64 = 50_000;
    pub const DEFAULT_LARGE: u64 = 500_000;
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            small: Self::DEFAULT_SMALL,
            large: Self::DEFAULT_LARGE,
        }
    }
}

/// Computed once per top-level fetch, immutable thereafter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub strategy: Strategy,
    pub total_estimate: Estimate,
    pub page_size: u64,
    pub worker_count: usize,
}

impl FetchPlan {
    /// Known page count, or `None` when pages must be discovered.
    pub fn page_count(&self) -> Option<usize> {
        self.total_estimate.page_count(self.page_size)
    }
}
