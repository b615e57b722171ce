//! Request-side task queue operations: enqueue, cancel, status and cleanup.
//!
//! Nothing here executes work. Requests persist rows and return immediately;
//! the worker pool picks tasks up independently.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use reviewq_core::{
    event_types, new_v7, CancelOutcome, ChecklistGenerationPayload, CredentialHash,
    EnqueueReceipt, Error, EventBroker, NewFileMetadata, NewTask, ProcessMode, QueueStats, Result,
    ReviewPayload, ReviewTargetStatus, Task, TaskStatus, TaskStatusView, TaskType,
};

use crate::config::{QueueConfig, ReviewConfig};
use crate::stores::Stores;

/// Raw bytes of a file supplied with an enqueue request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_hint: Option<String>,
    pub process_mode: ProcessMode,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(original_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            mime_hint: None,
            process_mode: ProcessMode::Text,
            data,
        }
    }

    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }

    pub fn with_process_mode(mut self, mode: ProcessMode) -> Self {
        self.process_mode = mode;
        self
    }
}

/// Task queue service.
#[derive(Clone)]
pub struct TaskQueue {
    stores: Stores,
    broker: Arc<dyn EventBroker>,
    config: QueueConfig,
    review: ReviewConfig,
}

impl TaskQueue {
    pub fn new(stores: Stores, broker: Arc<dyn EventBroker>, config: QueueConfig) -> Self {
        Self {
            stores,
            broker,
            config,
            review: ReviewConfig::default(),
        }
    }

    /// Use `review` for the chunking parameters embedded in review payloads.
    pub fn with_review_config(mut self, review: ReviewConfig) -> Self {
        self.review = review;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a task: check the credential's queue limit and duplicate work,
    /// store upload bytes, persist the row, and announce it.
    ///
    /// Returns the number of tasks queued for the credential afterwards.
    pub async fn enqueue(&self, task: NewTask, uploads: Vec<UploadedFile>) -> Result<EnqueueReceipt> {
        validate_uploads(&uploads)?;
        let queued = self
            .check_admission(&task.credential_hash, task.task_type, task.target_id)
            .await?;
        self.admit(task, uploads, queued).await
    }

    /// Persist an admitted task. `queued` is the credential's queue length
    /// read by [`Self::check_admission`].
    #[instrument(skip(self, task, uploads), fields(subsystem = "jobs", component = "queue", op = "enqueue"))]
    async fn admit(
        &self,
        mut task: NewTask,
        uploads: Vec<UploadedFile>,
        queued: i64,
    ) -> Result<EnqueueReceipt> {
        let start = Instant::now();
        let task_id = task.id;
        let mut files = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let file_id = new_v7();
            if let Err(e) = self.stores.uploads.write(task_id, file_id, &upload.data).await {
                self.purge_uploads(task_id).await;
                return Err(e);
            }
            files.push(NewFileMetadata {
                id: file_id,
                original_name: upload.original_name,
                mime_hint: upload.mime_hint,
                size_bytes: upload.data.len() as i64,
                process_mode: upload.process_mode,
                converted_image_count: 0,
            });
        }
        task.files.extend(files);

        let created = match self.stores.tasks.create(task).await {
            Ok(created) => created,
            Err(e) => {
                self.purge_uploads(task_id).await;
                return Err(e);
            }
        };

        let queue_length = self
            .stores
            .tasks
            .queued_count(&created.credential_hash)
            .await
            .unwrap_or(queued + 1);

        self.broker.publish(
            &created.user_id,
            event_types::TASK_QUEUED,
            json!({
                "task_id": created.id,
                "task_type": created.task_type,
                "target_id": created.target_id,
                "queue_length": queue_length,
            }),
        );

        info!(
            task_id = %created.id,
            task_type = %created.task_type,
            credential_hash = created.credential_hash.short(),
            queue_length,
            duration_ms = start.elapsed().as_millis() as u64,
            "Task enqueued"
        );

        Ok(EnqueueReceipt {
            task_id: created.id,
            status: TaskStatus::Queued,
            queue_length,
        })
    }

    /// Refuse work the queue cannot accept: a full credential queue or a
    /// task already active for the same target. Returns the queued count.
    ///
    /// The task store enforces the duplicate rule again on insert, so a
    /// request that races past this check still gets a conflict.
    pub(crate) async fn check_admission(
        &self,
        credential_hash: &CredentialHash,
        task_type: TaskType,
        target_id: Uuid,
    ) -> Result<i64> {
        let queued = self.stores.tasks.queued_count(credential_hash).await?;
        if queued >= self.config.max_queued_per_credential {
            warn!(
                credential_hash = credential_hash.short(),
                queued,
                limit = self.config.max_queued_per_credential,
                "Enqueue refused: credential queue full"
            );
            return Err(Error::QueueFull(format!(
                "{queued} tasks already queued for this credential (limit {})",
                self.config.max_queued_per_credential
            )));
        }

        if let Some(active) = self.stores.tasks.find_active(task_type, target_id).await? {
            return Err(Error::Conflict(format!(
                "{task_type} task {} is already {} for target {target_id}",
                active.id, active.status
            )));
        }
        Ok(queued)
    }

    /// Queue checklist generation for a space from uploaded documents.
    ///
    /// The space's previous generation error is cleared once the task is
    /// admitted and put back if persisting it fails.
    pub async fn request_checklist_generation(
        &self,
        credential_hash: CredentialHash,
        user_id: &str,
        space_id: Uuid,
        requirements: Option<String>,
        uploads: Vec<UploadedFile>,
    ) -> Result<EnqueueReceipt> {
        if uploads.is_empty() {
            return Err(Error::InvalidInput(
                "checklist generation needs at least one document".into(),
            ));
        }
        validate_uploads(&uploads)?;
        let space = self
            .stores
            .reviews
            .get_space(space_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("space {space_id}")))?;
        let queued = self
            .check_admission(&credential_hash, TaskType::ChecklistGeneration, space_id)
            .await?;

        let payload = ChecklistGenerationPayload {
            space_id,
            user_id: user_id.to_string(),
            requirements,
        };
        let task = NewTask::new(
            TaskType::ChecklistGeneration,
            credential_hash,
            space_id,
            user_id,
            &payload,
        )?;

        let previous = space.checklist_generation_error;
        if previous.is_some() {
            self.stores.reviews.set_generation_error(space_id, None).await?;
        }
        match self.admit(task, uploads, queued).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                // A conflict means another task owns the annotation now.
                if previous.is_some() && !matches!(e, Error::Conflict(_)) {
                    if let Err(restore) = self
                        .stores
                        .reviews
                        .set_generation_error(space_id, previous.as_deref())
                        .await
                    {
                        warn!(error = %restore, %space_id, "Failed to restore generation error");
                    }
                }
                Err(e)
            }
        }
    }

    /// Queue a review of the target's documents against the space's checklist.
    ///
    /// Uploads are added to the documents the target already holds. The
    /// checklist snapshot is re-copied from the space when the task runs, so
    /// a rejected request leaves the target's results untouched.
    pub async fn request_review(
        &self,
        credential_hash: CredentialHash,
        user_id: &str,
        target_id: Uuid,
        uploads: Vec<UploadedFile>,
    ) -> Result<EnqueueReceipt> {
        validate_uploads(&uploads)?;
        let target = self
            .stores
            .reviews
            .get_target(target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("review target {target_id}")))?;
        let queued = self
            .check_admission(&credential_hash, TaskType::Review, target_id)
            .await?;

        if uploads.is_empty() && self.stores.reviews.list_documents(target_id).await?.is_empty() {
            return Err(Error::InvalidInput("review needs at least one document".into()));
        }

        let checklist = self.stores.reviews.list_checklist_items(target.space_id).await?;
        if checklist.is_empty() {
            return Err(Error::InvalidInput(format!(
                "space {} has no checklist items",
                target.space_id
            )));
        }

        let mut payload = ReviewPayload::new(target_id, target.space_id, user_id);
        payload.evaluation_labels = self.review.evaluation_labels.clone();
        payload.max_checklist_chunk_size = self.review.max_checklist_chunk_size;
        payload.refresh_checklist = true;
        let task = NewTask::new(TaskType::Review, credential_hash, target_id, user_id, &payload)?;

        self.enqueue_for_target(task, uploads, target.status, queued)
            .await
    }

    /// Mark the target queued, then persist the admitted task; restore the
    /// previous status if that fails.
    pub(crate) async fn enqueue_for_target(
        &self,
        task: NewTask,
        uploads: Vec<UploadedFile>,
        previous: ReviewTargetStatus,
        queued: i64,
    ) -> Result<EnqueueReceipt> {
        let target_id = task.target_id;
        self.stores
            .reviews
            .set_target_status(target_id, ReviewTargetStatus::Queued, None)
            .await?;
        match self.admit(task, uploads, queued).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                if !matches!(e, Error::Conflict(_)) {
                    if let Err(restore) = self
                        .stores
                        .reviews
                        .set_target_status(target_id, previous, None)
                        .await
                    {
                        warn!(error = %restore, %target_id, "Failed to restore target status");
                    }
                }
                Err(e)
            }
        }
    }

    /// Cancel a task that no worker has picked up yet.
    ///
    /// Deletes the task and its file rows, purges stored uploads, and clears
    /// the owning aggregate's soft error.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "queue", op = "cancel"))]
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        let task = match self.stores.tasks.cancel_queued(task_id).await? {
            CancelOutcome::Cancelled { task, files } => {
                debug!(file_count = files.len(), "Removed file metadata with task");
                task
            }
            CancelOutcome::NotQueued(task) if task.status == TaskStatus::Processing => {
                return Err(Error::CannotCancelProcessing(task_id));
            }
            CancelOutcome::NotQueued(task) => {
                return Err(Error::Conflict(format!(
                    "task {task_id} already {}",
                    task.status
                )));
            }
            CancelOutcome::NotFound => return Err(Error::TaskNotFound(task_id)),
        };

        self.purge_uploads(task_id).await;
        self.clear_annotation(&task).await;

        self.broker.publish(
            &task.user_id,
            event_types::TASK_CANCELLED,
            json!({
                "task_id": task.id,
                "task_type": task.task_type,
                "target_id": task.target_id,
            }),
        );
        info!(%task_id, task_type = %task.task_type, "Task cancelled");
        Ok(())
    }

    async fn clear_annotation(&self, task: &Task) {
        let result = match task.task_type {
            TaskType::ChecklistGeneration => {
                self.stores
                    .reviews
                    .set_generation_error(task.target_id, None)
                    .await
            }
            TaskType::Review => {
                self.stores
                    .reviews
                    .set_target_status(task.target_id, ReviewTargetStatus::Pending, None)
                    .await
            }
        };
        if let Err(e) = result {
            warn!(
                error = %e,
                task_id = %task.id,
                target_id = %task.target_id,
                "Failed to reset owner after cancel"
            );
        }
    }

    async fn purge_uploads(&self, task_id: Uuid) {
        if let Err(e) = self.stores.uploads.purge_task(task_id).await {
            warn!(error = %e, %task_id, "Failed to purge task uploads");
        }
    }

    /// Polling view of a task.
    pub async fn get_status(&self, task_id: Uuid) -> Result<TaskStatusView> {
        self.stores
            .tasks
            .get(task_id)
            .await?
            .map(|task| TaskStatusView::from(&task))
            .ok_or(Error::TaskNotFound(task_id))
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.stores.tasks.queue_stats().await
    }

    /// Delete finished tasks older than the retention window and their
    /// stored uploads. Returns how many tasks were removed.
    pub async fn cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.retention_hours);
        let removed = self.stores.tasks.cleanup_finished(cutoff).await?;
        for task_id in &removed {
            self.purge_uploads(*task_id).await;
        }
        if !removed.is_empty() {
            info!(
                subsystem = "jobs",
                component = "queue",
                op = "cleanup",
                removed = removed.len(),
                "Removed finished tasks"
            );
        }
        Ok(removed.len())
    }
}

/// Reject uploads that cannot be stored, before anything is written.
fn validate_uploads(uploads: &[UploadedFile]) -> Result<()> {
    if uploads.iter().any(|u| u.original_name.trim().is_empty()) {
        return Err(Error::InvalidInput("uploaded file has no name".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use reviewq_core::{FileMetadataRepository, NewReviewResult, ReviewRepository, TaskRepository};

    fn doc(name: &str) -> UploadedFile {
        UploadedFile::new(name, b"clause one\nclause two\n".to_vec())
    }

    #[tokio::test]
    async fn test_enqueue_returns_queue_length_per_credential() {
        let h = Harness::new();
        let key = CredentialHash::from_credential("k1");
        let mut last = None;
        for _ in 0..3 {
            let target = h.seed_target(2).await;
            last = Some(
                h.queue
                    .request_review(key.clone(), "user-1", target.target.id, vec![doc("a.txt")])
                    .await
                    .unwrap(),
            );
        }
        let receipt = last.unwrap();
        assert_eq!(receipt.queue_length, 3);
        assert_eq!(receipt.status, TaskStatus::Queued);

        let other = h.seed_target(1).await;
        let receipt = h
            .queue
            .request_review(
                CredentialHash::from_credential("k2"),
                "user-2",
                other.target.id,
                vec![doc("b.txt")],
            )
            .await
            .unwrap();
        assert_eq!(receipt.queue_length, 1);
    }

    #[tokio::test]
    async fn test_enqueue_stores_files_and_marks_target_queued() {
        let h = Harness::new();
        let seeded = h.seed_target(2).await;
        let receipt = h
            .queue
            .request_review(
                CredentialHash::from_credential("k"),
                "user-1",
                seeded.target.id,
                vec![doc("a.txt"), doc("b.txt")],
            )
            .await
            .unwrap();

        let files = h.store.list_for_task(receipt.task_id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(h.uploads.file_count(receipt.task_id), 2);
        let target = h.store.get_target(seeded.target.id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Queued);
        assert_eq!(h.events_of(event_types::TASK_QUEUED).len(), 1);
    }

    #[tokio::test]
    async fn test_review_payload_carries_chunk_size_and_refresh() {
        let h = Harness::new();
        let seeded = h.seed_target(3).await;
        let queue = h
            .queue
            .clone()
            .with_review_config(ReviewConfig::default().with_max_checklist_chunk_size(7));
        let receipt = queue
            .request_review(CredentialHash::from_credential("k"), "u", seeded.target.id, vec![doc("a.txt")])
            .await
            .unwrap();

        let task = h.store.get(receipt.task_id).await.unwrap().unwrap();
        let payload: ReviewPayload = task.payload_as().unwrap();
        assert_eq!(payload.max_checklist_chunk_size, 7);
        assert!(payload.refresh_checklist);
        assert!(payload.checklist_item_ids.is_empty());
    }

    #[tokio::test]
    async fn test_queue_full_rejects_synchronously() {
        let h = Harness::with_queue_config(QueueConfig::default().with_max_queued_per_credential(1));
        let key = CredentialHash::from_credential("k");
        let first = h.seed_target(1).await;
        h.queue
            .request_review(key.clone(), "u", first.target.id, vec![doc("a.txt")])
            .await
            .unwrap();

        let second = h.seed_target(1).await;
        let err = h
            .queue
            .request_review(key, "u", second.target.id, vec![doc("a.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull(_)));
        let target = h.store.get_target(second.target.id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_review_is_conflict() {
        let h = Harness::new();
        let seeded = h.seed_target(1).await;
        let key = CredentialHash::from_credential("k");
        h.queue
            .request_review(key.clone(), "u", seeded.target.id, vec![doc("a.txt")])
            .await
            .unwrap();
        let err = h
            .queue
            .request_review(key, "u", seeded.target.id, vec![doc("a.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_enqueue_checks_admission_before_writing() {
        let h = Harness::with_queue_config(QueueConfig::default().with_max_queued_per_credential(1));
        let seeded = h.seed_target(1).await;
        let key = CredentialHash::from_credential("k");
        let task = |key: &CredentialHash| {
            NewTask::new(TaskType::Review, key.clone(), seeded.target.id, "u", &json!({})).unwrap()
        };
        h.queue.enqueue(task(&key), vec![doc("a.txt")]).await.unwrap();

        let err = h.queue.enqueue(task(&key), vec![doc("a.txt")]).await.unwrap_err();
        assert!(matches!(err, Error::QueueFull(_)));
        let err = h
            .queue
            .enqueue(task(&CredentialHash::from_credential("other")), vec![doc("a.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.events_of(event_types::TASK_QUEUED).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_review_keeps_results_and_status() {
        let h = Harness::new();
        let seeded = h.seed_target(2).await;
        let target_id = seeded.target.id;
        h.store
            .upsert_results(
                target_id,
                vec![
                    NewReviewResult::success(seeded.items[0].id, "A".into(), "ok".into()),
                    NewReviewResult::error(seeded.items[1].id, "timeout"),
                ],
            )
            .await
            .unwrap();
        h.store
            .set_target_status(target_id, ReviewTargetStatus::Completed, None)
            .await
            .unwrap();

        let err = h
            .queue
            .request_review(
                CredentialHash::from_credential("k"),
                "u",
                target_id,
                vec![UploadedFile::new("  ", b"text".to_vec())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        assert_eq!(h.store.list_results(target_id).await.unwrap().len(), 2);
        assert_eq!(h.store.list_target_items(target_id).await.unwrap().len(), 2);
        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Completed);
        assert!(h.events_of(event_types::TASK_QUEUED).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_generation_keeps_space_error() {
        let h = Harness::new();
        let space = h.store.create_space("S").await.unwrap();
        h.store
            .set_generation_error(space.id, Some("model unavailable"))
            .await
            .unwrap();
        let key = CredentialHash::from_credential("k");

        let err = h
            .queue
            .request_checklist_generation(
                key.clone(),
                "u",
                space.id,
                None,
                vec![UploadedFile::new("", b"text".to_vec())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let stored = h.store.get_space(space.id).await.unwrap().unwrap();
        assert_eq!(stored.checklist_generation_error.as_deref(), Some("model unavailable"));

        let blocker = NewTask::new(TaskType::ChecklistGeneration, key.clone(), space.id, "u", &json!({}))
            .unwrap();
        h.store.create(blocker).await.unwrap();
        let err = h
            .queue
            .request_checklist_generation(key, "u", space.id, None, vec![doc("requirements.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let stored = h.store.get_space(space.id).await.unwrap().unwrap();
        assert_eq!(stored.checklist_generation_error.as_deref(), Some("model unavailable"));
    }

    #[tokio::test]
    async fn test_cancel_queued_purges_and_resets_target() {
        let h = Harness::new();
        let seeded = h.seed_target(1).await;
        let receipt = h
            .queue
            .request_review(
                CredentialHash::from_credential("k"),
                "user-1",
                seeded.target.id,
                vec![doc("a.txt")],
            )
            .await
            .unwrap();

        h.queue.cancel(receipt.task_id).await.unwrap();

        assert!(h.store.get(receipt.task_id).await.unwrap().is_none());
        assert!(h.store.list_for_task(receipt.task_id).await.unwrap().is_empty());
        assert_eq!(h.uploads.file_count(receipt.task_id), 0);
        let target = h.store.get_target(seeded.target.id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Pending);
        assert_eq!(h.events_of(event_types::TASK_CANCELLED).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_processing_refused() {
        let h = Harness::new();
        let seeded = h.seed_target(1).await;
        let key = CredentialHash::from_credential("k");
        let receipt = h
            .queue
            .request_review(key.clone(), "u", seeded.target.id, vec![doc("a.txt")])
            .await
            .unwrap();
        h.store.dequeue_next(&key).await.unwrap();

        let err = h.queue.cancel(receipt.task_id).await.unwrap_err();
        assert!(matches!(err, Error::CannotCancelProcessing(id) if id == receipt.task_id));
        assert_eq!(err.code(), "CANNOT_CANCEL_PROCESSING");
        assert_eq!(h.uploads.file_count(receipt.task_id), 1);
        let status = h.queue.get_status(receipt.task_id).await.unwrap();
        assert_eq!(status.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_cancel_finished_and_unknown() {
        let h = Harness::new();
        let seeded = h.seed_target(1).await;
        let key = CredentialHash::from_credential("k");
        let receipt = h
            .queue
            .request_review(key.clone(), "u", seeded.target.id, vec![doc("a.txt")])
            .await
            .unwrap();
        h.store.dequeue_next(&key).await.unwrap();
        h.store.fail(receipt.task_id, "boom").await.unwrap();

        assert!(matches!(
            h.queue.cancel(receipt.task_id).await.unwrap_err(),
            Error::Conflict(_)
        ));
        assert!(matches!(
            h.queue.cancel(Uuid::new_v4()).await.unwrap_err(),
            Error::TaskNotFound(_)
        ));
        let status = h.queue.get_status(receipt.task_id).await.unwrap();
        assert_eq!(status.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_cancel_generation_clears_space_error() {
        let h = Harness::new();
        let space = h.store.create_space("S").await.unwrap();
        let receipt = h
            .queue
            .request_checklist_generation(
                CredentialHash::from_credential("k"),
                "u",
                space.id,
                None,
                vec![doc("requirements.txt")],
            )
            .await
            .unwrap();
        h.store
            .set_generation_error(space.id, Some("stale"))
            .await
            .unwrap();

        h.queue.cancel(receipt.task_id).await.unwrap();
        let space = h.store.get_space(space.id).await.unwrap().unwrap();
        assert!(space.checklist_generation_error.is_none());
    }

    #[tokio::test]
    async fn test_generation_requires_documents() {
        let h = Harness::new();
        let space = h.store.create_space("S").await.unwrap();
        let err = h
            .queue
            .request_checklist_generation(CredentialHash::from_credential("k"), "u", space.id, None, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_cleanup_removes_finished_tasks_and_uploads() {
        let h = Harness::with_queue_config(QueueConfig::default().with_retention_hours(0));
        let seeded = h.seed_target(1).await;
        let key = CredentialHash::from_credential("k");
        let receipt = h
            .queue
            .request_review(key.clone(), "u", seeded.target.id, vec![doc("a.txt")])
            .await
            .unwrap();
        h.store.dequeue_next(&key).await.unwrap();
        h.store.complete(receipt.task_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(h.queue.cleanup().await.unwrap(), 1);
        assert_eq!(h.uploads.file_count(receipt.task_id), 0);
        assert!(matches!(
            h.queue.get_status(receipt.task_id).await.unwrap_err(),
            Error::TaskNotFound(_)
        ));
    }
}
