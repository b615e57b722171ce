//! Task HTTP handlers: enqueue with uploads, poll, cancel, queue stats.

use std::str::FromStr;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use reviewq_core::{EnqueueReceipt, ProcessMode, QueueStats, TaskStatusView, TaskType};
use reviewq_jobs::UploadedFile;

use crate::{ApiError, AppState, Caller};

/// Parsed `multipart/form-data` body of an enqueue request.
#[derive(Debug, Default)]
struct TaskForm {
    task_type: Option<TaskType>,
    space_id: Option<Uuid>,
    target_id: Option<Uuid>,
    requirements: Option<String>,
    process_mode: ProcessMode,
    files: Vec<UploadedFile>,
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart data: {e}"))
}

async fn read_form(mut multipart: Multipart) -> Result<TaskForm, ApiError> {
    let mut form = TaskForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("File part needs a filename".into()))?;
                let mime = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                let mut upload = UploadedFile::new(file_name, data.to_vec());
                if let Some(mime) = mime {
                    upload = upload.with_mime_hint(mime);
                }
                form.files.push(upload);
            }
            "task_type" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.task_type = Some(TaskType::from_str(value.trim())?);
            }
            "space_id" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.space_id = Some(parse_uuid("space_id", &value)?);
            }
            "target_id" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.target_id = Some(parse_uuid("target_id", &value)?);
            }
            "requirements" => {
                let value = field.text().await.map_err(multipart_error)?;
                let value = value.trim();
                if !value.is_empty() {
                    form.requirements = Some(value.to_string());
                }
            }
            "process_mode" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.process_mode = ProcessMode::from_str(value.trim())?;
            }
            other => {
                tracing::debug!(subsystem = "api", field = other, "Ignoring unknown form field");
            }
        }
    }

    // Field order is up to the client, so the mode is applied once all parts are read.
    let mode = form.process_mode;
    form.files = form
        .files
        .into_iter()
        .map(|f| f.with_process_mode(mode))
        .collect();
    Ok(form)
}

/// Enqueue a checklist generation or review task.
///
/// # Form fields
/// - `task_type`: `checklist_generation` or `review`
/// - `space_id`: required for checklist generation
/// - `target_id`: required for review
/// - `requirements`: optional guidance for checklist generation
/// - `process_mode`: `text` (default) or `image`
/// - `file` / `files`: uploaded documents, repeatable
///
/// # Returns
/// - 202 Accepted with `{task_id, status, queue_length}`
/// - 409 Conflict when the target already has an active task
/// - 429 Too Many Requests when the credential's queue is full
pub async fn create_task(
    State(state): State<AppState>,
    caller: Caller,
    multipart: Multipart,
) -> Result<(StatusCode, Json<EnqueueReceipt>), ApiError> {
    let form = read_form(multipart).await?;
    let task_type = form
        .task_type
        .ok_or_else(|| ApiError::BadRequest("task_type is required".into()))?;

    let receipt = match task_type {
        TaskType::ChecklistGeneration => {
            let space_id = form.space_id.ok_or_else(|| {
                ApiError::BadRequest("space_id is required for checklist generation".into())
            })?;
            state
                .queue
                .request_checklist_generation(
                    caller.credential_hash,
                    &caller.user_id,
                    space_id,
                    form.requirements,
                    form.files,
                )
                .await?
        }
        TaskType::Review => {
            let target_id = form
                .target_id
                .ok_or_else(|| ApiError::BadRequest("target_id is required for review".into()))?;
            state
                .queue
                .request_review(caller.credential_hash, &caller.user_id, target_id, form.files)
                .await?
        }
    };

    tracing::info!(
        subsystem = "api",
        task_id = %receipt.task_id,
        task_type = %task_type,
        queue_length = receipt.queue_length,
        "Task accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn get_task(
    State(state): State<AppState>,
    _caller: Caller,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskStatusView>, ApiError> {
    Ok(Json(state.queue.get_status(task_id).await?))
}

/// Cancel a queued task. Processing tasks answer 409 `CANNOT_CANCEL_PROCESSING`.
pub async fn cancel_task(
    State(state): State<AppState>,
    _caller: Caller,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.queue.cancel(task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn queue_stats(
    State(state): State<AppState>,
    _caller: Caller,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.stats().await?))
}
