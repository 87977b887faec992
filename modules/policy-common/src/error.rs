use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyDiffError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
