use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use policy_common::{run_bounded, validate_city, validate_document_url};
use storage_client::object_key;

use super::extract::{JsonBody, Multipart, Query};
use crate::auth::UserSession;
use crate::error::ApiError;
use crate::AppState;

/// Per-request cap on request body size for uploads.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shown for a file the store refused; the store's own reply is only logged.
const UPLOAD_FAILED_MESSAGE: &str = "upload failed";

#[derive(Deserialize)]
pub struct UploadQuery {
    city: String,
}

#[derive(Deserialize)]
pub struct FetchRequest {
    url: String,
    name: String,
    city: String,
}

/// Outcome for one file of a multi-file upload.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum UploadResult {
    Stored { name: String, key: String, url: String },
    Failed { name: String, error: String },
}

struct PendingFile {
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

pub async fn api_upload(
    State(state): State<Arc<AppState>>,
    session: UserSession,
    Query(query): Query<UploadQuery>,
    Multipart(mut multipart): Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_city(&query.city)?;
    let city = query.city.trim().to_string();

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {e}")))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read {name}: {e}")))?;
        files.push(PendingFile {
            name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("no files in upload".to_string()));
    }

    info!(user = %session.username, city = %city, count = files.len(), "Uploading files");
    let today = chrono::Utc::now().date_naive();

    let tasks: Vec<_> = files
        .into_iter()
        .map(|file| {
            let state = state.clone();
            let key = object_key(&city, &file.name, today, Uuid::new_v4());
            move || async move {
                match state
                    .storage
                    .put_object(&key, file.bytes, &file.content_type)
                    .await
                {
                    Ok(stored) => UploadResult::Stored {
                        name: file.name,
                        key: stored.key,
                        url: stored.url,
                    },
                    Err(e) => {
                        warn!(file = %file.name, key = %key, error = %e, "Upload failed");
                        UploadResult::Failed {
                            name: file.name,
                            error: UPLOAD_FAILED_MESSAGE.to_string(),
                        }
                    }
                }
            }
        })
        .collect();

    let results = run_bounded(tasks, state.config.upload_concurrency).await;
    Ok(Json(serde_json::json!({ "files": results })))
}

/// Have the store pull a document from a remote URL.
pub async fn api_fetch_to_store(
    State(state): State<Arc<AppState>>,
    session: UserSession,
    JsonBody(body): JsonBody<FetchRequest>,
) -> Result<Json<UploadResult>, ApiError> {
    validate_document_url("url", &body.url)?;
    validate_city(&body.city)?;
    let url = body.url.trim();

    let today = chrono::Utc::now().date_naive();
    let key = object_key(body.city.trim(), &body.name, today, Uuid::new_v4());
    info!(user = %session.username, url, "Fetching remote document into store");

    let stored = state
        .storage
        .fetch_to_store(url, &key)
        .await
        .map_err(|e| anyhow::anyhow!("fetch-to-store failed: {e}"))?;

    Ok(Json(UploadResult::Stored {
        name: body.name,
        key: stored.key,
        url: stored.url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_results_serialize_flat() {
        let ok = UploadResult::Stored {
            name: "a.pdf".into(),
            key: "hz/a.pdf".into(),
            url: "https://cdn/hz/a.pdf".into(),
        };
        let failed = UploadResult::Failed {
            name: "b.pdf".into(),
            error: UPLOAD_FAILED_MESSAGE.into(),
        };
        assert_eq!(
            serde_json::to_value(vec![ok, failed]).unwrap(),
            serde_json::json!([
                { "name": "a.pdf", "key": "hz/a.pdf", "url": "https://cdn/hz/a.pdf" },
                { "name": "b.pdf", "error": "upload failed" },
            ])
        );
    }
}
