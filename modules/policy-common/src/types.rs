use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PolicyDiffError;

// --- Comparison kinds ---

/// Which workflow a comparison runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    /// This year's policy against last year's.
    Policy,
    /// A policy against a standard-compliance checklist.
    Standard,
}

impl ComparisonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonKind::Policy => "policy",
            ComparisonKind::Standard => "standard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "policy" => Some(ComparisonKind::Policy),
            "standard" => Some(ComparisonKind::Standard),
            _ => None,
        }
    }

    /// Human label used in exports.
    pub fn label(self) -> &'static str {
        match self {
            ComparisonKind::Policy => "政策年度对比",
            ComparisonKind::Standard => "标准符合性检查",
        }
    }

    /// Workflow parameter names for the (current, previous) documents.
    pub fn parameter_names(self) -> ParameterNames {
        match self {
            ComparisonKind::Policy => ParameterNames {
                current_url: "this_year_url",
                current_name: "this_year_name",
                previous_url: "last_year_url",
                previous_name: "last_year_name",
            },
            ComparisonKind::Standard => ParameterNames {
                current_url: "policy_url",
                current_name: "policy_name",
                previous_url: "standard_url",
                previous_name: "standard_name",
            },
        }
    }
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterNames {
    pub current_url: &'static str,
    pub current_name: &'static str,
    pub previous_url: &'static str,
    pub previous_name: &'static str,
}

// --- Records ---

/// An uploaded document referenced by a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub url: String,
}

/// Reject empty and non-http(s) document URLs. `label` names the field in the message.
pub fn validate_document_url(label: &str, url: &str) -> Result<(), PolicyDiffError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PolicyDiffError::Validation(format!("{label} is required")));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(PolicyDiffError::Validation(format!("{label} must be http(s)")));
    }
    Ok(())
}

/// Reject a blank city.
pub fn validate_city(city: &str) -> Result<(), PolicyDiffError> {
    if city.trim().is_empty() {
        return Err(PolicyDiffError::Validation("city is required".to_string()));
    }
    Ok(())
}

/// One comparison run and everything the reviewers did to it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub id: Uuid,
    pub kind: ComparisonKind,
    pub city: String,
    pub title: String,
    pub current_file: FileRef,
    pub previous_file: FileRef,
    /// Reply body exactly as the workflow returned it.
    pub raw_response: serde_json::Value,
    /// "structured" or "free_text".
    pub content_kind: String,
    /// Editable projection shown in the results table.
    pub content: serde_json::Value,
    /// Retries ran out before the content became structured.
    pub best_effort: bool,
    pub attempts: i32,
    pub reviewed: bool,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a new record. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewComparison {
    pub kind: ComparisonKind,
    pub city: String,
    pub title: String,
    pub current_file: FileRef,
    pub previous_file: FileRef,
    pub raw_response: serde_json::Value,
    pub content_kind: String,
    pub content: serde_json::Value,
    pub best_effort: bool,
    pub attempts: i32,
    pub created_by: String,
}
