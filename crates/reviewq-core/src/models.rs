//! Core data models for reviewq.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::credential::CredentialHash;
use crate::{defaults, Error, Result};

// =============================================================================
// TASKS
// =============================================================================

/// Kind of AI work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Generate checklist items for a space from uploaded documents
    ChecklistGeneration,
    /// Review documents against a checklist snapshot
    Review,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ChecklistGeneration => "checklist_generation",
            TaskType::Review => "review",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "checklist_generation" => Ok(TaskType::ChecklistGeneration),
            "review" => Ok(TaskType::Review),
            other => Err(Error::InvalidInput(format!("unknown task type: {other}"))),
        }
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// queued ──► processing ──► completed
///                      └──► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }

    /// Return an error unless `self -> next` is legal.
    pub fn ensure_transition(&self, next: TaskStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown task status: {other}"))),
        }
    }
}

/// A durable unit of AI work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub credential_hash: CredentialHash,
    pub priority: i32,
    /// Space id for generation tasks, review target id for review tasks.
    pub target_id: Uuid,
    /// User who requested the task; progress events are addressed to them.
    pub user_id: String,
    pub payload: JsonValue,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Deserialize the opaque payload into its typed form.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Check the timestamp invariants tied to `status`.
    pub fn timestamps_consistent(&self) -> bool {
        let started = self.started_at.is_some() == (self.status != TaskStatus::Queued);
        let completed = self.completed_at.is_some() == self.status.is_terminal();
        started && completed
    }
}

/// Input for creating a task together with its uploaded files.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Allocated up front so uploads can be stored under the task id before
    /// the row exists.
    pub id: Uuid,
    pub task_type: TaskType,
    pub credential_hash: CredentialHash,
    pub priority: i32,
    pub target_id: Uuid,
    pub user_id: String,
    pub payload: JsonValue,
    pub files: Vec<NewFileMetadata>,
}

impl NewTask {
    /// Build a task with a typed payload and default priority.
    pub fn new<P: Serialize>(
        task_type: TaskType,
        credential_hash: CredentialHash,
        target_id: Uuid,
        user_id: impl Into<String>,
        payload: &P,
    ) -> Result<Self> {
        Ok(Self {
            id: crate::new_v7(),
            task_type,
            credential_hash,
            priority: defaults::TASK_PRIORITY,
            target_id,
            user_id: user_id.into(),
            payload: serde_json::to_value(payload)?,
            files: Vec::new(),
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_files(mut self, files: Vec<NewFileMetadata>) -> Self {
        self.files = files;
        self
    }
}

/// Response returned by enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueReceipt {
    pub task_id: Uuid,
    pub status: TaskStatus,
    /// Queued tasks for the same credential at enqueue time; a best-effort hint.
    pub queue_length: i64,
}

/// Polling view of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        Self {
            status: task.status,
            error_message: task.error_message.clone(),
        }
    }
}

/// Result of an attempted cancellation at the storage layer.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The queued task and its file rows were deleted.
    Cancelled {
        task: Task,
        files: Vec<FileMetadata>,
    },
    /// The task exists but is no longer queued.
    NotQueued(Task),
    /// No task with that id.
    NotFound,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

// =============================================================================
// FILE METADATA
// =============================================================================

/// How an uploaded file is fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Extract text and send it as text
    #[default]
    Text,
    /// Convert pages to images
    Image,
}

impl ProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::Text => "text",
            ProcessMode::Image => "image",
        }
    }
}

impl FromStr for ProcessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ProcessMode::Text),
            "image" => Ok(ProcessMode::Image),
            other => Err(Error::InvalidInput(format!("unknown process mode: {other}"))),
        }
    }
}

/// Descriptor of a file uploaded with a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: Uuid,
    pub task_id: Uuid,
    pub original_name: String,
    pub mime_hint: Option<String>,
    pub size_bytes: i64,
    pub process_mode: ProcessMode,
    pub converted_image_count: i32,
}

/// File descriptor supplied at enqueue; `id` is allocated before the bytes are
/// written so storage and metadata share it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileMetadata {
    pub id: Uuid,
    pub original_name: String,
    pub mime_hint: Option<String>,
    pub size_bytes: i64,
    pub process_mode: ProcessMode,
    pub converted_image_count: i32,
}

impl NewFileMetadata {
    pub fn into_metadata(self, task_id: Uuid) -> FileMetadata {
        FileMetadata {
            id: self.id,
            task_id,
            original_name: self.original_name,
            mime_hint: self.mime_hint,
            size_bytes: self.size_bytes,
            process_mode: self.process_mode,
            converted_image_count: self.converted_image_count,
        }
    }
}

// =============================================================================
// REVIEW AGGREGATE
// =============================================================================

/// A workspace owning a checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub id: Uuid,
    pub name: String,
    /// Soft-error annotation left by a failed checklist generation.
    pub checklist_generation_error: Option<String>,
}

/// An item of a space's current checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub space_id: Uuid,
    pub content: String,
    pub ordinal: i32,
}

/// Review progress state of a target, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewTargetStatus {
    Pending,
    Queued,
    Reviewing,
    Completed,
    Error,
}

impl ReviewTargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewTargetStatus::Pending => "pending",
            ReviewTargetStatus::Queued => "queued",
            ReviewTargetStatus::Reviewing => "reviewing",
            ReviewTargetStatus::Completed => "completed",
            ReviewTargetStatus::Error => "error",
        }
    }
}

impl FromStr for ReviewTargetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReviewTargetStatus::Pending),
            "queued" => Ok(ReviewTargetStatus::Queued),
            "reviewing" => Ok(ReviewTargetStatus::Reviewing),
            "completed" => Ok(ReviewTargetStatus::Completed),
            "error" => Ok(ReviewTargetStatus::Error),
            other => Err(Error::InvalidInput(format!(
                "unknown review target status: {other}"
            ))),
        }
    }
}

/// A set of documents reviewed against a checklist snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTarget {
    pub id: Uuid,
    pub space_id: Uuid,
    pub name: String,
    pub status: ReviewTargetStatus,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Checklist item copied into a review target when the review was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewChecklistItem {
    pub id: Uuid,
    pub review_target_id: Uuid,
    /// Item of the space checklist this was copied from, if it still exists.
    pub source_item_id: Option<Uuid>,
    pub content: String,
    pub ordinal: i32,
}

/// Outcome for one checklist item of a review target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub id: Uuid,
    pub review_target_id: Uuid,
    pub checklist_item_id: Uuid,
    pub evaluation: Option<String>,
    pub comment: Option<String>,
    /// Set on error rows: the item could not be evaluated.
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewResult {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Upsert input for a review result, keyed by `(target, checklist item)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReviewResult {
    pub checklist_item_id: Uuid,
    pub evaluation: Option<String>,
    pub comment: Option<String>,
    pub error_message: Option<String>,
}

impl NewReviewResult {
    pub fn success(checklist_item_id: Uuid, evaluation: String, comment: String) -> Self {
        Self {
            checklist_item_id,
            evaluation: Some(evaluation),
            comment: Some(comment),
            error_message: None,
        }
    }

    pub fn error(checklist_item_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            checklist_item_id,
            evaluation: None,
            comment: None,
            error_message: Some(message.into()),
        }
    }
}

/// Extracted text of an uploaded document, cached for retries and Q&A.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: Uuid,
    pub review_target_id: Uuid,
    pub original_name: String,
    pub mime_hint: Option<String>,
    pub process_mode: ProcessMode,
    pub extracted_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// RESULT CACHE
// =============================================================================

/// One chunk's model output for one document and one checklist result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultCacheEntry {
    pub id: Uuid,
    pub document_snapshot_id: Uuid,
    pub result_id: Uuid,
    pub comment: String,
    pub total_chunks: i32,
    pub chunk_index: i32,
    pub per_chunk_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for saving a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResultCacheEntry {
    pub document_snapshot_id: Uuid,
    pub result_id: Uuid,
    pub comment: String,
    pub total_chunks: i32,
    pub chunk_index: i32,
    pub per_chunk_label: Option<String>,
}

/// Cached entry joined with the checklist item and document it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedComment {
    pub checklist_item_id: Uuid,
    pub document_snapshot_id: Uuid,
    pub document_name: String,
    pub chunk_index: i32,
    pub total_chunks: i32,
    pub per_chunk_label: Option<String>,
    pub comment: String,
}

/// Reassembled evidence for one checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvidence {
    pub checklist_item_id: Uuid,
    pub documents: Vec<DocumentEvidence>,
}

/// Per-document slice of [`ItemEvidence`], chunks in `chunk_index` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvidence {
    pub document_snapshot_id: Uuid,
    pub document_name: String,
    pub chunks: Vec<ChunkComment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkComment {
    pub chunk_index: i32,
    pub total_chunks: i32,
    pub label: Option<String>,
    pub comment: String,
}

// =============================================================================
// RETRY
// =============================================================================

/// Which result rows a retry re-submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryScope {
    /// Only error rows
    Failed,
    /// Every row of the target
    All,
}

impl FromStr for RetryScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "failed" => Ok(RetryScope::Failed),
            "all" => Ok(RetryScope::All),
            other => Err(Error::InvalidInput(format!(
                "retry scope must be \"failed\" or \"all\", got {other:?}"
            ))),
        }
    }
}

/// Response of a retry request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub target_id: Uuid,
    pub task_id: Uuid,
    pub status: ReviewTargetStatus,
    pub total_items: usize,
    pub retry_items: usize,
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Payload of a checklist generation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistGenerationPayload {
    pub space_id: Uuid,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

/// Payload of a review task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub review_target_id: Uuid,
    pub space_id: Uuid,
    pub user_id: String,
    /// Snapshot items to evaluate; empty means every item of the target.
    #[serde(default)]
    pub checklist_item_ids: Vec<Uuid>,
    /// Cached document snapshots to reuse instead of extracting uploads.
    #[serde(default)]
    pub document_snapshot_ids: Vec<Uuid>,
    /// Labels ordered from best to worst.
    #[serde(default = "default_evaluation_labels")]
    pub evaluation_labels: Vec<String>,
    #[serde(default = "default_max_checklist_chunk_size")]
    pub max_checklist_chunk_size: i64,
    #[serde(default)]
    pub is_retry: bool,
    /// Re-copy the space's checklist into the target before reviewing.
    #[serde(default)]
    pub refresh_checklist: bool,
}

fn default_evaluation_labels() -> Vec<String> {
    defaults::EVALUATION_LABELS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_checklist_chunk_size() -> i64 {
    defaults::MAX_CHECKLIST_CHUNK_SIZE
}

impl ReviewPayload {
    pub fn new(review_target_id: Uuid, space_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            review_target_id,
            space_id,
            user_id: user_id.into(),
            checklist_item_ids: Vec::new(),
            document_snapshot_ids: Vec::new(),
            evaluation_labels: default_evaluation_labels(),
            max_checklist_chunk_size: default_max_checklist_chunk_size(),
            is_retry: false,
            refresh_checklist: false,
        }
    }
}

// =============================================================================
// MODEL I/O
// =============================================================================

/// A checklist item as handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistPrompt {
    pub id: Uuid,
    pub content: String,
}

/// Model verdict for one checklist item over one piece of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub checklist_item_id: Uuid,
    pub evaluation: String,
    pub comment: String,
}

/// Output of a [`crate::TextExtractor`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    /// Page images produced for image-mode files; zero for text mode.
    pub converted_image_count: i32,
}

impl ExtractedText {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            converted_image_count: 0,
        }
    }
}

/// A piece of document text handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPart {
    pub document_name: String,
    pub text: String,
    pub part_index: usize,
    pub total_parts: usize,
}
