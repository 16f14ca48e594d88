pub mod deadline;
pub mod executor;
