//! Repository and capability traits.
//!
//! Storage crates implement the repository traits (PostgreSQL and in-memory);
//! services in `reviewq-jobs` only ever see `Arc<dyn …>` handles. Extraction
//! and model calls are consumed through the capability traits and never
//! implemented here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::credential::CredentialHash;
use crate::models::*;
use crate::Result;

// =============================================================================
// TASK STORE
// =============================================================================

/// Durable task queue.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a queued task and its file metadata rows atomically.
    async fn create(&self, task: NewTask) -> Result<Task>;

    /// Get task by ID.
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Number of queued tasks for a credential.
    async fn queued_count(&self, credential_hash: &CredentialHash) -> Result<i64>;

    /// Credential hashes that currently have queued tasks, oldest work first.
    async fn distinct_queued_credentials(&self) -> Result<Vec<CredentialHash>>;

    /// Lock one queued task of the credential (skipping rows locked by other
    /// pollers), flip it to processing, and return it.
    async fn dequeue_next(&self, credential_hash: &CredentialHash) -> Result<Option<Task>>;

    /// processing → completed.
    async fn complete(&self, task_id: Uuid) -> Result<()>;

    /// processing → failed, recording the message.
    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()>;

    /// Delete a task and its file rows if, and only if, it is still queued.
    async fn cancel_queued(&self, task_id: Uuid) -> Result<CancelOutcome>;

    /// A queued or processing task of this type for the target, if any.
    async fn find_active(&self, task_type: TaskType, target_id: Uuid) -> Result<Option<Task>>;

    /// List tasks in a status, oldest first.
    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>>;

    /// Counts per status.
    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Delete terminal tasks finished before `older_than`; returns their ids.
    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

/// Side table of files uploaded with a task.
#[async_trait]
pub trait FileMetadataRepository: Send + Sync {
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<FileMetadata>>;

    async fn delete_for_task(&self, task_id: Uuid) -> Result<u64>;

    /// Record how many page images a file was converted into.
    async fn set_converted_image_count(&self, file_id: Uuid, count: i32) -> Result<()>;
}

// =============================================================================
// RESULT CACHE
// =============================================================================

/// Chunked model output keyed to document snapshots.
#[async_trait]
pub trait ResultCacheRepository: Send + Sync {
    async fn save(&self, entry: NewResultCacheEntry) -> Result<ResultCacheEntry>;

    async fn save_many(&self, entries: Vec<NewResultCacheEntry>) -> Result<Vec<ResultCacheEntry>>;

    /// Drop every entry of `result_ids` and insert `entries`, atomically.
    async fn replace_for_results(
        &self,
        result_ids: &[Uuid],
        entries: Vec<NewResultCacheEntry>,
    ) -> Result<Vec<ResultCacheEntry>>;

    /// Every cached comment contributing to the given checklist items,
    /// ordered by item, document, then chunk index.
    async fn find_comments_for_items(&self, checklist_item_ids: &[Uuid])
        -> Result<Vec<CachedComment>>;

    /// Largest `total_chunks` ever recorded for a document snapshot. Kept on
    /// the snapshot itself, so dropping cache rows does not reset it.
    async fn max_total_chunks(&self, document_snapshot_id: Uuid) -> Result<Option<i32>>;
}

// =============================================================================
// REVIEW AGGREGATE
// =============================================================================

/// Persistence for spaces, review targets, results and document snapshots.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn create_space(&self, name: &str) -> Result<Space>;

    async fn get_space(&self, space_id: Uuid) -> Result<Option<Space>>;

    /// Set or clear the space's checklist-generation soft error.
    async fn set_generation_error(&self, space_id: Uuid, error: Option<&str>) -> Result<()>;

    async fn list_checklist_items(&self, space_id: Uuid) -> Result<Vec<ChecklistItem>>;

    async fn append_checklist_items(
        &self,
        space_id: Uuid,
        contents: &[String],
    ) -> Result<Vec<ChecklistItem>>;

    /// Create a target in `pending` with an empty checklist snapshot.
    async fn create_target(&self, space_id: Uuid, name: &str) -> Result<ReviewTarget>;

    async fn get_target(&self, target_id: Uuid) -> Result<Option<ReviewTarget>>;

    async fn set_target_status(
        &self,
        target_id: Uuid,
        status: ReviewTargetStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn list_target_items(&self, target_id: Uuid) -> Result<Vec<ReviewChecklistItem>>;

    /// Replace the target's checklist snapshot (and its results) with copies
    /// of `items`.
    async fn replace_target_items(
        &self,
        target_id: Uuid,
        items: &[ChecklistItem],
    ) -> Result<Vec<ReviewChecklistItem>>;

    async fn list_results(&self, target_id: Uuid) -> Result<Vec<ReviewResult>>;

    /// Insert or overwrite results keyed by `(target, checklist item)`.
    async fn upsert_results(
        &self,
        target_id: Uuid,
        results: Vec<NewReviewResult>,
    ) -> Result<Vec<ReviewResult>>;

    async fn list_documents(&self, target_id: Uuid) -> Result<Vec<DocumentSnapshot>>;

    async fn get_documents(&self, document_ids: &[Uuid]) -> Result<Vec<DocumentSnapshot>>;

    async fn save_document(
        &self,
        target_id: Uuid,
        file: &FileMetadata,
        extracted_text: &str,
    ) -> Result<DocumentSnapshot>;
}

// =============================================================================
// UPLOADS
// =============================================================================

/// Raw bytes of uploaded files, grouped per task.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn write(&self, task_id: Uuid, file_id: Uuid, data: &[u8]) -> Result<()>;

    async fn read(&self, task_id: Uuid, file_id: Uuid) -> Result<Vec<u8>>;

    /// Remove everything stored for the task. Missing data is not an error.
    async fn purge_task(&self, task_id: Uuid) -> Result<()>;
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Document text extraction.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from an uploaded file. Image-mode files report how many
    /// page images were produced along the way.
    async fn extract(&self, file: &FileMetadata, data: &[u8]) -> Result<ExtractedText>;
}

/// AI model used by task handlers.
#[async_trait]
pub trait ReviewModel: Send + Sync {
    /// Propose checklist item contents for the given documents.
    async fn generate_checklist(
        &self,
        documents: &[DocumentPart],
        requirements: Option<&str>,
    ) -> Result<Vec<String>>;

    /// Evaluate a chunk of checklist items against one piece of a document.
    ///
    /// Returns [`crate::Error::ContextOverflow`] when the input is too large.
    async fn review_chunk(
        &self,
        items: &[ChecklistPrompt],
        document: &DocumentPart,
    ) -> Result<Vec<ItemVerdict>>;
}

/// Streaming question answering over cached review evidence.
#[async_trait]
pub trait QaModel: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        context: &str,
    ) -> Result<BoxStream<'static, Result<String>>>;
}
