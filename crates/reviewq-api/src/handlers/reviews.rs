//! Space, checklist and review target handlers, plus retry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reviewq_core::{
    ChecklistItem, DocumentSnapshot, Error, ProcessMode, RetryOutcome, ReviewChecklistItem,
    ReviewResult, ReviewTarget, Space,
};

use crate::{ApiError, AppState, Caller};

#[derive(Debug, Deserialize)]
pub struct CreateSpaceRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendChecklistRequest {
    pub items: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub name: String,
}

/// Request body for a retry. `scope` is `"failed"` (default) or `"all"`.
#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub use_latest_checklist: bool,
}

fn default_scope() -> String {
    "failed".to_string()
}

#[derive(Debug, Serialize)]
pub struct SpaceDetail {
    #[serde(flatten)]
    pub space: Space,
    pub checklist: Vec<ChecklistItem>,
}

/// Document entry without its extracted text.
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub original_name: String,
    pub process_mode: ProcessMode,
    pub created_at: DateTime<Utc>,
}

impl From<DocumentSnapshot> for DocumentSummary {
    fn from(doc: DocumentSnapshot) -> Self {
        Self {
            id: doc.id,
            original_name: doc.original_name,
            process_mode: doc.process_mode,
            created_at: doc.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: ReviewTarget,
    pub checklist_items: Vec<ReviewChecklistItem>,
    pub results: Vec<ReviewResult>,
    pub documents: Vec<DocumentSummary>,
}

fn require_name(name: &str) -> Result<&str, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    Ok(name)
}

pub async fn create_space(
    State(state): State<AppState>,
    _caller: Caller,
    Json(body): Json<CreateSpaceRequest>,
) -> Result<(StatusCode, Json<Space>), ApiError> {
    let space = state.stores.reviews.create_space(require_name(&body.name)?).await?;
    Ok((StatusCode::CREATED, Json(space)))
}

pub async fn get_space(
    State(state): State<AppState>,
    _caller: Caller,
    Path(space_id): Path<Uuid>,
) -> Result<Json<SpaceDetail>, ApiError> {
    let space = state
        .stores
        .reviews
        .get_space(space_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("space {space_id}")))?;
    let checklist = state.stores.reviews.list_checklist_items(space_id).await?;
    Ok(Json(SpaceDetail { space, checklist }))
}

/// Append hand-written items to a space's checklist.
pub async fn append_checklist_items(
    State(state): State<AppState>,
    _caller: Caller,
    Path(space_id): Path<Uuid>,
    Json(body): Json<AppendChecklistRequest>,
) -> Result<(StatusCode, Json<Vec<ChecklistItem>>), ApiError> {
    let items: Vec<String> = body
        .items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return Err(ApiError::BadRequest("items must not be empty".into()));
    }
    state
        .stores
        .reviews
        .get_space(space_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("space {space_id}")))?;
    let created = state
        .stores
        .reviews
        .append_checklist_items(space_id, &items)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn create_target(
    State(state): State<AppState>,
    _caller: Caller,
    Path(space_id): Path<Uuid>,
    Json(body): Json<CreateTargetRequest>,
) -> Result<(StatusCode, Json<ReviewTarget>), ApiError> {
    let name = require_name(&body.name)?;
    state
        .stores
        .reviews
        .get_space(space_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("space {space_id}")))?;
    let target = state.stores.reviews.create_target(space_id, name).await?;
    Ok((StatusCode::CREATED, Json(target)))
}

pub async fn get_target(
    State(state): State<AppState>,
    _caller: Caller,
    Path(target_id): Path<Uuid>,
) -> Result<Json<TargetDetail>, ApiError> {
    let reviews = &state.stores.reviews;
    let target = reviews
        .get_target(target_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("review target {target_id}")))?;
    let checklist_items = reviews.list_target_items(target_id).await?;
    let results = reviews.list_results(target_id).await?;
    let documents = reviews
        .list_documents(target_id)
        .await?
        .into_iter()
        .map(DocumentSummary::from)
        .collect();

    Ok(Json(TargetDetail {
        target,
        checklist_items,
        results,
        documents,
    }))
}

/// Re-run failed (or all) items of a target.
///
/// # Returns
/// - 202 Accepted with `{target_id, task_id, status, total_items, retry_items}`
/// - 400 when nothing matches the scope or the scope is invalid
/// - 409 when the target already has an active review task
pub async fn retry_target(
    State(state): State<AppState>,
    caller: Caller,
    Path(target_id): Path<Uuid>,
    Json(body): Json<RetryRequest>,
) -> Result<(StatusCode, Json<RetryOutcome>), ApiError> {
    let outcome = state
        .retry
        .retry(
            caller.credential_hash,
            &caller.user_id,
            target_id,
            &body.scope,
            body.use_latest_checklist,
        )
        .await?;
    tracing::info!(
        subsystem = "api",
        target_id = %target_id,
        task_id = %outcome.task_id,
        retry_items = outcome.retry_items,
        "Retry accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}
