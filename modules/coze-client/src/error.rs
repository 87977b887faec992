use thiserror::Error;

pub type Result<T> = std::result::Result<T, CozeError>;

#[derive(Debug, Error)]
pub enum CozeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Workflow call failed (status {status}): {message}")]
    WorkflowCallFailed { status: u16, message: String },

    #[error("Workflow call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl From<reqwest::Error> for CozeError {
    fn from(err: reqwest::Error) -> Self {
        CozeError::Network(err.to_string())
    }
}
