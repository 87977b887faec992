pub mod concurrency;
pub mod config;
pub mod error;
pub mod types;

pub use concurrency::run_bounded;
pub use config::{Config, Credential};
pub use error::PolicyDiffError;
pub use types::*;
