pub mod error;
pub mod metabase;
pub mod session;
pub mod upstream;
