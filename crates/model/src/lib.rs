pub mod outcome;
pub mod page;
pub mod plan;
pub mod query;
