pub mod error;
pub mod options;
pub mod settings;

pub use options::FetchOptions;
pub use settings::FetchSettings;
