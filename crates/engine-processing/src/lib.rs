pub mod assembler;
pub mod coordinator;
pub mod error;
pub mod estimator;
pub mod fetcher;
pub mod retry;
pub mod sequential;
pub mod strategy;
pub mod worker;
