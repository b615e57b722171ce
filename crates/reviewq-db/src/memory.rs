//! In-memory repositories for tests and single-process deployments.
//!
//! All state sits behind one mutex, so every repository call is atomic. The
//! dequeue is a compare-and-set on the status of the best queued row, which
//! gives the same at-most-once delivery as the PostgreSQL `SKIP LOCKED` path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use reviewq_core::{
    new_v7, CachedComment, CancelOutcome, ChecklistItem, CredentialHash, DocumentSnapshot, Error,
    FileMetadata, FileMetadataRepository, NewResultCacheEntry, NewReviewResult, NewTask,
    QueueStats, Result, ResultCacheEntry, ResultCacheRepository, ReviewChecklistItem,
    ReviewRepository, ReviewResult, ReviewTarget, ReviewTargetStatus, Space, Task,
    TaskRepository, TaskStatus, TaskType, UploadStore,
};

#[derive(Default)]
struct MemoryState {
    /// Tasks with their insertion sequence, the tie-breaker after created_at.
    tasks: HashMap<Uuid, (u64, Task)>,
    next_seq: u64,
    files: Vec<FileMetadata>,
    spaces: HashMap<Uuid, Space>,
    checklist_items: Vec<ChecklistItem>,
    targets: HashMap<Uuid, ReviewTarget>,
    target_items: Vec<ReviewChecklistItem>,
    results: Vec<ReviewResult>,
    documents: Vec<DocumentSnapshot>,
    cache: Vec<ResultCacheEntry>,
    /// Finest split recorded per document; outlives the cache rows.
    document_splits: HashMap<Uuid, i32>,
}

impl MemoryState {
    fn remove_task(&mut self, task_id: Uuid) -> Vec<FileMetadata> {
        self.tasks.remove(&task_id);
        let (removed, kept): (Vec<FileMetadata>, Vec<FileMetadata>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|f| f.task_id == task_id);
        self.files = kept;
        removed
    }

    fn store_entries(&mut self, entries: Vec<NewResultCacheEntry>) -> Vec<ResultCacheEntry> {
        let saved: Vec<ResultCacheEntry> = entries.into_iter().map(materialize_entry).collect();
        for entry in &saved {
            let split = self
                .document_splits
                .entry(entry.document_snapshot_id)
                .or_insert(entry.total_chunks);
            *split = (*split).max(entry.total_chunks);
        }
        self.cache.extend(saved.iter().cloned());
        saved
    }
}

/// Process-local store implementing every repository trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    notify: Arc<Notify>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle signalled on every successful task create.
    pub fn task_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: NewTask) -> Result<Task> {
        let task_id = task.id;
        let stored = Task {
            id: task_id,
            task_type: task.task_type,
            status: TaskStatus::Queued,
            credential_hash: task.credential_hash,
            priority: task.priority,
            target_id: task.target_id,
            user_id: task.user_id,
            payload: task.payload,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        {
            let mut state = self.lock();
            let active = state.tasks.values().any(|(_, t)| {
                t.task_type == stored.task_type
                    && t.target_id == stored.target_id
                    && !t.status.is_terminal()
            });
            if active {
                return Err(Error::Conflict(format!(
                    "{} task is already active for target {}",
                    stored.task_type, stored.target_id
                )));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state
                .files
                .extend(task.files.into_iter().map(|f| f.into_metadata(task_id)));
            state.tasks.insert(task_id, (seq, stored.clone()));
        }

        self.notify.notify_waiters();
        Ok(stored)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.lock().tasks.get(&task_id).map(|(_, t)| t.clone()))
    }

    async fn queued_count(&self, credential_hash: &CredentialHash) -> Result<i64> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|(_, t)| t.status == TaskStatus::Queued && &t.credential_hash == credential_hash)
            .count() as i64)
    }

    async fn distinct_queued_credentials(&self) -> Result<Vec<CredentialHash>> {
        let state = self.lock();
        let mut oldest: HashMap<&CredentialHash, (DateTime<Utc>, u64)> = HashMap::new();
        for (seq, task) in state.tasks.values() {
            if task.status != TaskStatus::Queued {
                continue;
            }
            let key = (task.created_at, *seq);
            oldest
                .entry(&task.credential_hash)
                .and_modify(|k| *k = (*k).min(key))
                .or_insert(key);
        }
        let mut hashes: Vec<_> = oldest.into_iter().collect();
        hashes.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(hashes.into_iter().map(|(h, _)| h.clone()).collect())
    }

    async fn dequeue_next(&self, credential_hash: &CredentialHash) -> Result<Option<Task>> {
        let mut state = self.lock();
        let next = state
            .tasks
            .values()
            .filter(|(_, t)| t.status == TaskStatus::Queued && &t.credential_hash == credential_hash)
            .min_by(|(sa, a), (sb, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(sa.cmp(sb))
            })
            .map(|(_, t)| t.id);

        let Some(task_id) = next else {
            return Ok(None);
        };
        let Some((_, task)) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        task.status.ensure_transition(TaskStatus::Processing)?;
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        Ok(Some(task.clone()))
    }

    async fn complete(&self, task_id: Uuid) -> Result<()> {
        let mut state = self.lock();
        let (_, task) = state
            .tasks
            .get_mut(&task_id)
            .ok_or(Error::TaskNotFound(task_id))?;
        task.status.ensure_transition(TaskStatus::Completed)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.error_message = None;
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.lock();
        let (_, task) = state
            .tasks
            .get_mut(&task_id)
            .ok_or(Error::TaskNotFound(task_id))?;
        task.status.ensure_transition(TaskStatus::Failed)?;
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.error_message = Some(error.to_string());
        Ok(())
    }

    async fn cancel_queued(&self, task_id: Uuid) -> Result<CancelOutcome> {
        let mut state = self.lock();
        let Some((_, task)) = state.tasks.get(&task_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        let task = task.clone();
        if task.status != TaskStatus::Queued {
            return Ok(CancelOutcome::NotQueued(task));
        }
        let files = state.remove_task(task_id);
        Ok(CancelOutcome::Cancelled { task, files })
    }

    async fn find_active(&self, task_type: TaskType, target_id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|(_, t)| {
                t.task_type == task_type && t.target_id == target_id && !t.status.is_terminal()
            })
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, t)| t.clone()))
    }

    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>> {
        let state = self.lock();
        let mut tasks: Vec<&(u64, Task)> = state
            .tasks
            .values()
            .filter(|(_, t)| t.status == status)
            .collect();
        tasks.sort_by_key(|(seq, t)| (t.created_at, *seq));
        Ok(tasks
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for (_, task) in self.lock().tasks.values() {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut state = self.lock();
        let expired: Vec<Uuid> = state
            .tasks
            .values()
            .filter(|(_, t)| t.status.is_terminal() && t.completed_at.is_some_and(|c| c < older_than))
            .map(|(_, t)| t.id)
            .collect();
        for id in &expired {
            state.remove_task(*id);
        }
        Ok(expired)
    }
}

#[async_trait]
impl FileMetadataRepository for MemoryStore {
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<FileMetadata>> {
        Ok(self
            .lock()
            .files
            .iter()
            .filter(|f| f.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn delete_for_task(&self, task_id: Uuid) -> Result<u64> {
        let mut state = self.lock();
        let before = state.files.len();
        state.files.retain(|f| f.task_id != task_id);
        Ok((before - state.files.len()) as u64)
    }

    async fn set_converted_image_count(&self, file_id: Uuid, count: i32) -> Result<()> {
        let mut state = self.lock();
        let file = state
            .files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or_else(|| Error::NotFound(format!("file {file_id}")))?;
        file.converted_image_count = count;
        Ok(())
    }
}

#[async_trait]
impl ResultCacheRepository for MemoryStore {
    async fn save(&self, entry: NewResultCacheEntry) -> Result<ResultCacheEntry> {
        let mut saved = self.save_many(vec![entry]).await?;
        saved
            .pop()
            .ok_or_else(|| Error::Internal("cache entry not saved".into()))
    }

    async fn save_many(&self, entries: Vec<NewResultCacheEntry>) -> Result<Vec<ResultCacheEntry>> {
        Ok(self.lock().store_entries(entries))
    }

    async fn replace_for_results(
        &self,
        result_ids: &[Uuid],
        entries: Vec<NewResultCacheEntry>,
    ) -> Result<Vec<ResultCacheEntry>> {
        let mut state = self.lock();
        state.cache.retain(|e| !result_ids.contains(&e.result_id));
        Ok(state.store_entries(entries))
    }

    async fn find_comments_for_items(
        &self,
        checklist_item_ids: &[Uuid],
    ) -> Result<Vec<CachedComment>> {
        let state = self.lock();
        let mut comments = Vec::new();
        for entry in &state.cache {
            let Some(result) = state.results.iter().find(|r| r.id == entry.result_id) else {
                continue;
            };
            if !checklist_item_ids.contains(&result.checklist_item_id) {
                continue;
            }
            let Some(document) = state
                .documents
                .iter()
                .find(|d| d.id == entry.document_snapshot_id)
            else {
                continue;
            };
            comments.push((
                document.created_at,
                CachedComment {
                    checklist_item_id: result.checklist_item_id,
                    document_snapshot_id: document.id,
                    document_name: document.original_name.clone(),
                    chunk_index: entry.chunk_index,
                    total_chunks: entry.total_chunks,
                    per_chunk_label: entry.per_chunk_label.clone(),
                    comment: entry.comment.clone(),
                },
            ));
        }
        comments.sort_by(|(ta, a), (tb, b)| {
            a.checklist_item_id
                .cmp(&b.checklist_item_id)
                .then(ta.cmp(tb))
                .then(a.document_snapshot_id.cmp(&b.document_snapshot_id))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(comments.into_iter().map(|(_, c)| c).collect())
    }

    async fn max_total_chunks(&self, document_snapshot_id: Uuid) -> Result<Option<i32>> {
        Ok(self
            .lock()
            .document_splits
            .get(&document_snapshot_id)
            .copied())
    }
}

fn materialize_entry(entry: NewResultCacheEntry) -> ResultCacheEntry {
    ResultCacheEntry {
        id: new_v7(),
        document_snapshot_id: entry.document_snapshot_id,
        result_id: entry.result_id,
        comment: entry.comment,
        total_chunks: entry.total_chunks,
        chunk_index: entry.chunk_index,
        per_chunk_label: entry.per_chunk_label,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl ReviewRepository for MemoryStore {
    async fn create_space(&self, name: &str) -> Result<Space> {
        let space = Space {
            id: new_v7(),
            name: name.to_string(),
            checklist_generation_error: None,
        };
        self.lock().spaces.insert(space.id, space.clone());
        Ok(space)
    }

    async fn get_space(&self, space_id: Uuid) -> Result<Option<Space>> {
        Ok(self.lock().spaces.get(&space_id).cloned())
    }

    async fn set_generation_error(&self, space_id: Uuid, error: Option<&str>) -> Result<()> {
        let mut state = self.lock();
        let space = state
            .spaces
            .get_mut(&space_id)
            .ok_or_else(|| Error::NotFound(format!("space {space_id}")))?;
        space.checklist_generation_error = error.map(str::to_string);
        Ok(())
    }

    async fn list_checklist_items(&self, space_id: Uuid) -> Result<Vec<ChecklistItem>> {
        let mut items: Vec<ChecklistItem> = self
            .lock()
            .checklist_items
            .iter()
            .filter(|i| i.space_id == space_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.ordinal);
        Ok(items)
    }

    async fn append_checklist_items(
        &self,
        space_id: Uuid,
        contents: &[String],
    ) -> Result<Vec<ChecklistItem>> {
        let mut state = self.lock();
        if !state.spaces.contains_key(&space_id) {
            return Err(Error::NotFound(format!("space {space_id}")));
        }
        let next = state
            .checklist_items
            .iter()
            .filter(|i| i.space_id == space_id)
            .map(|i| i.ordinal + 1)
            .max()
            .unwrap_or(0);
        let items: Vec<ChecklistItem> = contents
            .iter()
            .enumerate()
            .map(|(offset, content)| ChecklistItem {
                id: new_v7(),
                space_id,
                content: content.clone(),
                ordinal: next + offset as i32,
            })
            .collect();
        state.checklist_items.extend(items.iter().cloned());
        Ok(items)
    }

    async fn create_target(&self, space_id: Uuid, name: &str) -> Result<ReviewTarget> {
        let mut state = self.lock();
        if !state.spaces.contains_key(&space_id) {
            return Err(Error::NotFound(format!("space {space_id}")));
        }
        let target = ReviewTarget {
            id: new_v7(),
            space_id,
            name: name.to_string(),
            status: ReviewTargetStatus::Pending,
            error_message: None,
            updated_at: Utc::now(),
        };
        state.targets.insert(target.id, target.clone());
        Ok(target)
    }

    async fn get_target(&self, target_id: Uuid) -> Result<Option<ReviewTarget>> {
        Ok(self.lock().targets.get(&target_id).cloned())
    }

    async fn set_target_status(
        &self,
        target_id: Uuid,
        status: ReviewTargetStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.lock();
        let target = state
            .targets
            .get_mut(&target_id)
            .ok_or_else(|| Error::NotFound(format!("review target {target_id}")))?;
        target.status = status;
        target.error_message = error.map(str::to_string);
        target.updated_at = Utc::now();
        Ok(())
    }

    async fn list_target_items(&self, target_id: Uuid) -> Result<Vec<ReviewChecklistItem>> {
        let mut items: Vec<ReviewChecklistItem> = self
            .lock()
            .target_items
            .iter()
            .filter(|i| i.review_target_id == target_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.ordinal);
        Ok(items)
    }

    async fn replace_target_items(
        &self,
        target_id: Uuid,
        items: &[ChecklistItem],
    ) -> Result<Vec<ReviewChecklistItem>> {
        let mut state = self.lock();

        let old_items: Vec<Uuid> = state
            .target_items
            .iter()
            .filter(|i| i.review_target_id == target_id)
            .map(|i| i.id)
            .collect();
        let old_results: Vec<Uuid> = state
            .results
            .iter()
            .filter(|r| old_items.contains(&r.checklist_item_id))
            .map(|r| r.id)
            .collect();
        state.cache.retain(|e| !old_results.contains(&e.result_id));
        state.results.retain(|r| !old_items.contains(&r.checklist_item_id));
        state.target_items.retain(|i| i.review_target_id != target_id);

        let snapshot: Vec<ReviewChecklistItem> = items
            .iter()
            .enumerate()
            .map(|(ordinal, item)| ReviewChecklistItem {
                id: new_v7(),
                review_target_id: target_id,
                source_item_id: Some(item.id),
                content: item.content.clone(),
                ordinal: ordinal as i32,
            })
            .collect();
        state.target_items.extend(snapshot.iter().cloned());
        Ok(snapshot)
    }

    async fn list_results(&self, target_id: Uuid) -> Result<Vec<ReviewResult>> {
        let state = self.lock();
        let ordinal = |item_id: Uuid| {
            state
                .target_items
                .iter()
                .find(|i| i.id == item_id)
                .map(|i| i.ordinal)
                .unwrap_or(i32::MAX)
        };
        let mut results: Vec<ReviewResult> = state
            .results
            .iter()
            .filter(|r| r.review_target_id == target_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| ordinal(r.checklist_item_id));
        Ok(results)
    }

    async fn upsert_results(
        &self,
        target_id: Uuid,
        results: Vec<NewReviewResult>,
    ) -> Result<Vec<ReviewResult>> {
        let now = Utc::now();
        let mut state = self.lock();
        let mut saved = Vec::with_capacity(results.len());
        for result in results {
            let existing = state.results.iter().position(|r| {
                r.review_target_id == target_id && r.checklist_item_id == result.checklist_item_id
            });
            let row = match existing {
                Some(idx) => {
                    let row = &mut state.results[idx];
                    row.evaluation = result.evaluation;
                    row.comment = result.comment;
                    row.error_message = result.error_message;
                    row.updated_at = now;
                    row.clone()
                }
                None => {
                    let row = ReviewResult {
                        id: new_v7(),
                        review_target_id: target_id,
                        checklist_item_id: result.checklist_item_id,
                        evaluation: result.evaluation,
                        comment: result.comment,
                        error_message: result.error_message,
                        updated_at: now,
                    };
                    state.results.push(row.clone());
                    row
                }
            };
            saved.push(row);
        }
        Ok(saved)
    }

    async fn list_documents(&self, target_id: Uuid) -> Result<Vec<DocumentSnapshot>> {
        Ok(self
            .lock()
            .documents
            .iter()
            .filter(|d| d.review_target_id == target_id)
            .cloned()
            .collect())
    }

    async fn get_documents(&self, document_ids: &[Uuid]) -> Result<Vec<DocumentSnapshot>> {
        Ok(self
            .lock()
            .documents
            .iter()
            .filter(|d| document_ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn save_document(
        &self,
        target_id: Uuid,
        file: &FileMetadata,
        extracted_text: &str,
    ) -> Result<DocumentSnapshot> {
        let document = DocumentSnapshot {
            id: new_v7(),
            review_target_id: target_id,
            original_name: file.original_name.clone(),
            mime_hint: file.mime_hint.clone(),
            process_mode: file.process_mode,
            extracted_text: Some(extracted_text.to_string()),
            created_at: Utc::now(),
        };
        self.lock().documents.push(document.clone());
        Ok(document)
    }
}

/// Upload store keeping bytes in memory.
#[derive(Clone, Default)]
pub struct MemoryUploadStore {
    files: Arc<Mutex<HashMap<(Uuid, Uuid), Vec<u8>>>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently stored for a task.
    pub fn file_count(&self, task_id: Uuid) -> usize {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|(t, _)| *t == task_id)
            .count()
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn write(&self, task_id: Uuid, file_id: Uuid, data: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((task_id, file_id), data.to_vec());
        Ok(())
    }

    async fn read(&self, task_id: Uuid, file_id: Uuid) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(task_id, file_id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("upload {file_id} of task {task_id}")))
    }

    async fn purge_task(&self, task_id: Uuid) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(t, _), _| *t != task_id);
        Ok(())
    }
}
