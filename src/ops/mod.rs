//! Pipeline orchestration - source resolution and deployment

pub mod deploy;
pub mod error;
pub mod resolve;

pub use error::RunError;
