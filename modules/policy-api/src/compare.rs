use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use coze_client::{Finality, WorkflowOutcome, WorkflowRequest};
use policy_common::{
    validate_city, validate_document_url, ComparisonKind, ComparisonRecord, Config, FileRef,
    NewComparison, PolicyDiffError,
};

use crate::error::ApiError;
use crate::AppState;

/// What the user asks to compare.
#[derive(Debug, Clone, Deserialize)]
pub struct ComparisonInput {
    pub kind: ComparisonKind,
    pub city: String,
    pub title: Option<String>,
    /// This year's policy, or the policy being checked.
    pub current_file: FileRef,
    /// Last year's policy, or the standard document.
    pub previous_file: FileRef,
}

impl ComparisonInput {
    pub fn validate(&self) -> Result<(), PolicyDiffError> {
        validate_city(&self.city)?;
        validate_document_url("current_file.url", &self.current_file.url)?;
        validate_document_url("previous_file.url", &self.previous_file.url)
    }

    pub fn title_or_default(&self, today: NaiveDate) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!(
                "{} {} {} / {}",
                today.format("%Y-%m-%d"),
                self.kind.label(),
                self.current_file.name,
                self.previous_file.name
            ),
        }
    }
}

pub fn workflow_id(config: &Config, kind: ComparisonKind) -> &str {
    match kind {
        ComparisonKind::Policy => &config.coze_policy_workflow_id,
        ComparisonKind::Standard => &config.coze_standard_workflow_id,
    }
}

pub fn workflow_request(workflow_id: &str, input: &ComparisonInput) -> WorkflowRequest {
    let names = input.kind.parameter_names();
    WorkflowRequest::new(workflow_id)
        .param(names.current_url, input.current_file.url.trim())
        .param(names.current_name, input.current_file.name.trim())
        .param(names.previous_url, input.previous_file.url.trim())
        .param(names.previous_name, input.previous_file.name.trim())
}

/// Shape a workflow outcome into a row to persist.
pub fn new_comparison(
    input: ComparisonInput,
    outcome: WorkflowOutcome,
    created_by: &str,
    today: NaiveDate,
) -> NewComparison {
    let title = input.title_or_default(today);
    let content_kind = outcome.content.kind().as_str().to_string();
    NewComparison {
        kind: input.kind,
        city: input.city.trim().to_string(),
        title,
        current_file: input.current_file,
        previous_file: input.previous_file,
        raw_response: outcome.raw_body,
        content_kind,
        content: outcome.content.into_value(),
        best_effort: outcome.finality == Finality::BestEffortInvalid,
        attempts: outcome.attempts as i32,
        created_by: created_by.to_string(),
    }
}

/// Run the workflow for one comparison and store the result.
pub async fn run_comparison(
    state: &AppState,
    username: &str,
    input: ComparisonInput,
) -> Result<ComparisonRecord, ApiError> {
    input.validate()?;

    let request = workflow_request(workflow_id(&state.config, input.kind), &input);
    info!(
        kind = %input.kind,
        city = %input.city,
        user = username,
        "Starting comparison"
    );

    let outcome = state
        .coze
        .run_workflow(&request)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    let today = chrono::Utc::now().date_naive();
    let record = state
        .store
        .insert(new_comparison(input, outcome, username, today))
        .await?;

    info!(
        record_id = %record.id,
        attempts = record.attempts,
        best_effort = record.best_effort,
        content_kind = %record.content_kind,
        "Comparison stored"
    );
    Ok(record)
}
