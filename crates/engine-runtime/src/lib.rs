pub mod execution;

pub use execution::executor::{FetchPreview, WarehouseFetcher, fetch};
