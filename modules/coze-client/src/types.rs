use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::NormalizedContent;

/// Body of a `POST /v1/workflow/run` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRequest {
    pub workflow_id: String,
    pub parameters: BTreeMap<String, String>,
}

impl WorkflowRequest {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    TransportError,
    HttpError,
    MalformedJson,
    UnrecognizedShape,
    Valid,
}

/// Result of one request to the workflow endpoint.
#[derive(Debug, Clone)]
pub struct WorkflowAttempt {
    pub number: u32,
    pub kind: AttemptKind,
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub content: Option<NormalizedContent>,
    pub message: Option<String>,
}

/// Whether the returned content passed shape validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    Valid,
    /// Retries ran out while the body was still unrecognized. The content is
    /// whatever the last attempt returned.
    BestEffortInvalid,
}

/// What `CozeClient::run_workflow` hands back to the caller.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub attempts: u32,
    pub http_status: u16,
    pub raw_body: Value,
    pub content: NormalizedContent,
    pub finality: Finality,
}

impl WorkflowOutcome {
    pub fn is_valid(&self) -> bool {
        self.finality == Finality::Valid
    }
}

/// Fixed-count, fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(2000),
        }
    }
}
