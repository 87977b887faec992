pub mod extract;
pub mod session;
pub mod uploads;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use coze_client::NormalizedContent;
use policy_common::{ComparisonKind, ComparisonRecord};

use crate::auth::UserSession;
use crate::compare::{self, ComparisonInput};
use crate::error::ApiError;
use crate::export;
use crate::AppState;

use self::extract::{JsonBody, Path, Query};

// --- Query structs ---

#[derive(Deserialize)]
pub struct ListQuery {
    city: Option<String>,
    kind: Option<String>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct ContentUpdate {
    content: serde_json::Value,
}

#[derive(Deserialize)]
pub struct ReviewUpdate {
    reviewed: bool,
}

// --- Handlers ---

pub async fn api_create_comparison(
    State(state): State<Arc<AppState>>,
    session: UserSession,
    JsonBody(input): JsonBody<ComparisonInput>,
) -> Result<(StatusCode, Json<ComparisonRecord>), ApiError> {
    let record = compare::run_comparison(&state, &session.username, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn api_list_comparisons(
    State(state): State<Arc<AppState>>,
    _session: UserSession,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<ComparisonRecord>>, ApiError> {
    let kind = match params.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(k) => Some(
            ComparisonKind::parse(k)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown kind '{k}'")))?,
        ),
        None => None,
    };
    let city = params.city.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let records = state
        .store
        .list(city, kind, params.limit.unwrap_or(50))
        .await?;
    Ok(Json(records))
}

pub async fn api_get_comparison(
    State(state): State<Arc<AppState>>,
    _session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<ComparisonRecord>, ApiError> {
    let record = state.store.find(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(record))
}

/// Replace the edited table content. The kind is re-derived so a reviewer can
/// turn free text into a structured report by hand.
pub async fn api_update_content(
    State(state): State<Arc<AppState>>,
    session: UserSession,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<ContentUpdate>,
) -> Result<Json<ComparisonRecord>, ApiError> {
    let content = NormalizedContent::from_value(body.content);
    let record = state
        .store
        .update_content(id, content.kind().as_str(), content.value())
        .await?
        .ok_or(ApiError::NotFound)?;
    info!(record_id = %id, user = %session.username, "Comparison content edited");
    Ok(Json(record))
}

pub async fn api_set_review(
    State(state): State<Arc<AppState>>,
    session: UserSession,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<ReviewUpdate>,
) -> Result<Json<ComparisonRecord>, ApiError> {
    let record = state
        .store
        .set_reviewed(id, body.reviewed, &session.username)
        .await?
        .ok_or(ApiError::NotFound)?;
    info!(record_id = %id, user = %session.username, reviewed = body.reviewed, "Review flag updated");
    Ok(Json(record))
}

pub async fn api_delete_comparison(
    State(state): State<Arc<AppState>>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.store.delete(id).await? {
        return Err(ApiError::NotFound);
    }
    info!(record_id = %id, user = %session.username, "Comparison deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_export_markdown(
    State(state): State<Arc<AppState>>,
    _session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let record = state.store.find(id).await?.ok_or(ApiError::NotFound)?;
    let markdown = export::render_markdown(&record);
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&record, "md")),
        ],
        markdown,
    )
        .into_response())
}

pub async fn api_export_pdf(
    State(state): State<Arc<AppState>>,
    _session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let record = state.store.find(id).await?.ok_or(ApiError::NotFound)?;
    let markdown = export::render_markdown(&record);
    let pdf = export::markdown_to_pdf(&state.config.pandoc_bin, &markdown).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, attachment(&record, "pdf")),
        ],
        pdf,
    )
        .into_response())
}

/// ASCII-only download name; the title may be CJK.
fn attachment(record: &ComparisonRecord, ext: &str) -> String {
    format!("attachment; filename=\"comparison-{}.{ext}\"", record.id.simple())
}
