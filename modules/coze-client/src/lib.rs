pub mod error;
pub mod normalize;
pub mod types;

pub use error::{CozeError, Result};
pub use normalize::{
    classify, display_value, extract_content, normalize, ChecklistItem, ContentKind,
    NormalizedContent, PayloadSchema, StructuredPayload, CHECKLIST_FIELDS, REPORT_FIELDS,
};
pub use types::{
    AttemptKind, Finality, RetryPolicy, WorkflowAttempt, WorkflowOutcome, WorkflowRequest,
};

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

pub const DEFAULT_WORKFLOW_URL: &str = "https://api.coze.cn/v1/workflow/run";

/// Longest error body kept in an attempt message.
const MAX_MESSAGE_CHARS: usize = 500;

pub struct CozeClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    policy: RetryPolicy,
}

impl CozeClient {
    pub fn new(endpoint: &str, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            token,
            policy: RetryPolicy::default(),
        }
    }

    /// Same as `new` but with a per-request timeout on the underlying client.
    pub fn with_timeout(endpoint: &str, token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run a workflow, retrying until the reply normalizes to structured
    /// content or the attempt budget is spent.
    ///
    /// A reply that decodes but never becomes structured is returned as
    /// `Finality::BestEffortInvalid` rather than an error. Only a final attempt
    /// that fails outright (transport, non-2xx, non-JSON) produces `Err`.
    pub async fn run_workflow(&self, request: &WorkflowRequest) -> Result<WorkflowOutcome> {
        let max_attempts = self.policy.max_attempts.max(1);
        let workflow_id = request.workflow_id.as_str();
        let mut last_status: Option<u16> = None;
        let mut last_message = String::new();

        for number in 1..=max_attempts {
            let attempt = self.attempt(number, request).await;

            match attempt.kind {
                AttemptKind::Valid => {
                    info!(workflow_id, attempt = number, "Workflow returned structured content");
                    return Ok(into_outcome(attempt, Finality::Valid));
                }
                AttemptKind::UnrecognizedShape if number == max_attempts => {
                    warn!(
                        workflow_id,
                        attempts = number,
                        "Workflow content still unstructured after final attempt, returning best effort"
                    );
                    return Ok(into_outcome(attempt, Finality::BestEffortInvalid));
                }
                AttemptKind::UnrecognizedShape => {
                    info!(
                        workflow_id,
                        attempt = number,
                        "Workflow content not structured yet, retrying"
                    );
                }
                kind => {
                    // The final error describes the most recent failure only.
                    last_status = attempt.status;
                    last_message = attempt.message.unwrap_or_default();
                    warn!(
                        workflow_id,
                        attempt = number,
                        ?kind,
                        status = ?attempt.status,
                        error = %last_message,
                        "Workflow attempt failed"
                    );
                }
            }

            if number < max_attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        match last_status {
            Some(status) => Err(CozeError::WorkflowCallFailed {
                status,
                message: last_message,
            }),
            None => Err(CozeError::RetriesExhausted {
                attempts: max_attempts,
                last_error: last_message,
            }),
        }
    }

    async fn attempt(&self, number: u32, request: &WorkflowRequest) -> WorkflowAttempt {
        let failed = |kind: AttemptKind, status: Option<u16>, message: String| WorkflowAttempt {
            number,
            kind,
            status,
            body: None,
            content: None,
            message: Some(message),
        };

        let resp = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return failed(AttemptKind::TransportError, None, e.to_string()),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                return failed(AttemptKind::TransportError, Some(status.as_u16()), e.to_string())
            }
        };

        if !status.is_success() {
            return failed(
                AttemptKind::HttpError,
                Some(status.as_u16()),
                truncate(&text, MAX_MESSAGE_CHARS),
            );
        }

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) => {
                return failed(
                    AttemptKind::MalformedJson,
                    Some(status.as_u16()),
                    format!("response body was not valid JSON: {e}"),
                )
            }
        };

        if let Some(code) = body.get("code").and_then(Value::as_i64).filter(|c| *c != 0) {
            let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
            warn!(workflow_id = %request.workflow_id, attempt = number, code, msg, "Coze reported a workflow error");
        }

        let content = normalize(&body);
        let kind = if content.is_structured() {
            AttemptKind::Valid
        } else {
            AttemptKind::UnrecognizedShape
        };

        WorkflowAttempt {
            number,
            kind,
            status: Some(status.as_u16()),
            body: Some(body),
            content: Some(content),
            message: None,
        }
    }
}

fn into_outcome(attempt: WorkflowAttempt, finality: Finality) -> WorkflowOutcome {
    WorkflowOutcome {
        attempts: attempt.number,
        http_status: attempt.status.unwrap_or_default(),
        raw_body: attempt.body.unwrap_or_default(),
        content: attempt.content.unwrap_or_default(),
        finality,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
