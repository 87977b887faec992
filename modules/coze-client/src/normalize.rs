//! Recovers the real payload from a workflow reply.
//!
//! The workflow platform re-serializes nested results inconsistently: the
//! `data` field may hold the payload directly, as a JSON-encoded string, or as
//! a string that itself wraps another `data` string. Everything here degrades
//! to free text instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level keys of a comparison report.
pub const REPORT_FIELDS: [&str; 6] = [
    "summary",
    "added",
    "modified",
    "deleted",
    "statistics",
    "detailed",
];

/// Keys of a single checklist item.
pub const CHECKLIST_FIELDS: [&str; 4] = ["id", "name", "status", "matched"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Structured,
    FreeText,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Structured => "structured",
            ContentKind::FreeText => "free_text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSchema {
    ComparisonReport,
    Checklist,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredPayload {
    pub schema: PayloadSchema,
    pub value: Value,
}

impl StructuredPayload {
    /// A report section such as `summary` or `added`. Always `None` for checklists.
    pub fn report_section(&self, field: &str) -> Option<&Value> {
        match self.schema {
            PayloadSchema::ComparisonReport => self.value.get(field).filter(|v| !v.is_null()),
            PayloadSchema::Checklist => None,
        }
    }

    /// Checklist rows. A lone checklist object yields one row.
    pub fn checklist_items(&self) -> Vec<ChecklistItem> {
        if self.schema != PayloadSchema::Checklist {
            return Vec::new();
        }
        match &self.value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            obj @ Value::Object(_) => serde_json::from_value(obj.clone()).ok().into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// One row of a standard-compliance checklist. Field types vary between
/// workflow versions, so they stay as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub matched: Value,
}

/// Render a scalar JSON cell the way a human would type it.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "是".to_string(),
        Value::Bool(false) => "否".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedContent {
    Structured(StructuredPayload),
    FreeText(Value),
}

impl NormalizedContent {
    /// Classify an already-unwrapped value.
    pub fn from_value(value: Value) -> Self {
        match classify(&value) {
            Some(schema) => NormalizedContent::Structured(StructuredPayload { schema, value }),
            None => NormalizedContent::FreeText(value),
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            NormalizedContent::Structured(_) => ContentKind::Structured,
            NormalizedContent::FreeText(_) => ContentKind::FreeText,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, NormalizedContent::Structured(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            NormalizedContent::Structured(p) => &p.value,
            NormalizedContent::FreeText(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            NormalizedContent::Structured(p) => p.value,
            NormalizedContent::FreeText(v) => v,
        }
    }
}

impl Default for NormalizedContent {
    fn default() -> Self {
        NormalizedContent::FreeText(Value::Null)
    }
}

/// Unwrap and classify a decoded reply body.
pub fn normalize(body: &Value) -> NormalizedContent {
    NormalizedContent::from_value(extract_content(body).unwrap_or(Value::Null))
}

/// Walk the `data` envelope down to the payload. `None` when there is no
/// `data` field or it holds a scalar.
pub fn extract_content(body: &Value) -> Option<Value> {
    let data = body.get("data")?;
    match data {
        Value::String(s) => Some(unwrap_encoded(s)),
        Value::Array(_) => Some(data.clone()),
        Value::Object(obj) => Some(match obj.get("data") {
            Some(Value::String(inner)) => parse_or_raw(inner),
            Some(inner) if !inner.is_null() => inner.clone(),
            _ => data.clone(),
        }),
        _ => None,
    }
}

/// Which known schema, if any, a value matches.
pub fn classify(value: &Value) -> Option<PayloadSchema> {
    match value {
        Value::Object(obj) if has_any(obj, &REPORT_FIELDS) => Some(PayloadSchema::ComparisonReport),
        Value::Object(obj) if has_any(obj, &CHECKLIST_FIELDS) => Some(PayloadSchema::Checklist),
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) if has_any(first, &CHECKLIST_FIELDS) => {
                Some(PayloadSchema::Checklist)
            }
            _ => None,
        },
        _ => None,
    }
}

fn has_any(obj: &Map<String, Value>, fields: &[&str]) -> bool {
    fields.iter().any(|f| obj.contains_key(*f))
}

fn unwrap_encoded(s: &str) -> Value {
    let Some(parsed) = parse_container(s) else {
        return Value::String(s.to_string());
    };
    match parsed.get("data") {
        Some(Value::String(inner)) => parse_or_raw(inner),
        Some(inner) if !inner.is_null() => inner.clone(),
        _ => parsed,
    }
}

fn parse_or_raw(s: &str) -> Value {
    parse_container(s).unwrap_or_else(|| Value::String(s.to_string()))
}

/// Parse only when the text encodes an object or array. Prose such as "2024"
/// or "true" stays a string.
fn parse_container(s: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(s.trim()) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}
