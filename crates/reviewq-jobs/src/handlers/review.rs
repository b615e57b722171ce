//! Review execution: evaluate a target's checklist snapshot against its
//! documents in bounded model calls.
//!
//! Checklist items are split into equal chunks; documents longer than the
//! configured limit are split into parts. Each (item chunk, document part)
//! pair is one model call. A context overflow doubles the part count of that
//! document and repeats its pass, never going finer than the configured
//! ceiling. Per-item outcomes are merged across documents and parts: the
//! worst label wins and the per-part comments are kept as cache rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use reviewq_core::{
    event_types, split_into_chunks, split_text_into_parts, ChecklistChunk, ChecklistPrompt,
    ChunkComment, DocumentEvidence, DocumentPart, DocumentSnapshot, Error, EventBroker,
    ItemEvidence, NewResultCacheEntry, NewReviewResult, ProcessMode, Result, ReviewModel,
    ReviewPayload, ReviewTargetStatus, TaskType, TextExtractor,
};

use crate::config::ReviewConfig;
use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::result_cache::{aggregate_comment, ResultCache};
use crate::stores::Stores;

/// Outcome counts of one review task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub total_items: usize,
    pub succeeded_items: usize,
    pub failed_items: usize,
    pub documents: usize,
    /// Successful rows across the whole target, including items this task
    /// did not touch.
    pub target_succeeded_items: usize,
}

/// One model verdict for an item over one document part.
#[derive(Debug, Clone)]
struct Observation {
    document_index: usize,
    part_index: usize,
    total_parts: usize,
    label: String,
    comment: String,
}

#[derive(Default)]
struct ItemOutcome {
    observations: Vec<Observation>,
    errors: Vec<String>,
}

/// Pick the worst label by its position in `labels` (best first). Labels not
/// in the list rank below every listed one.
pub fn merge_labels<'a>(found: impl IntoIterator<Item = &'a str>, labels: &[String]) -> Option<String> {
    found
        .into_iter()
        .max_by_key(|label| {
            labels
                .iter()
                .position(|l| l == label)
                .unwrap_or(labels.len())
        })
        .map(str::to_string)
}

/// Handler for [`TaskType::Review`].
pub struct ReviewHandler {
    stores: Stores,
    cache: ResultCache,
    broker: Arc<dyn EventBroker>,
    extractor: Arc<dyn TextExtractor>,
    model: Arc<dyn ReviewModel>,
    config: ReviewConfig,
}

impl ReviewHandler {
    pub fn new(
        stores: Stores,
        broker: Arc<dyn EventBroker>,
        extractor: Arc<dyn TextExtractor>,
        model: Arc<dyn ReviewModel>,
        config: ReviewConfig,
    ) -> Self {
        Self {
            cache: ResultCache::new(stores.result_cache.clone()),
            stores,
            broker,
            extractor,
            model,
            config,
        }
    }

    /// Extract the task's uploads into new snapshots, then return the
    /// documents the review runs over.
    async fn load_documents(
        &self,
        ctx: &TaskContext,
        payload: &ReviewPayload,
    ) -> Result<Vec<(DocumentSnapshot, String)>> {
        let files = self.stores.files.list_for_task(ctx.task_id()).await?;
        let mut fresh = Vec::with_capacity(files.len());
        for file in &files {
            let data = self.stores.uploads.read(ctx.task_id(), file.id).await?;
            let extracted = self.extractor.extract(file, &data).await?;
            if file.process_mode == ProcessMode::Image && extracted.converted_image_count > 0 {
                self.stores
                    .files
                    .set_converted_image_count(file.id, extracted.converted_image_count)
                    .await?;
            }
            let snapshot = self
                .stores
                .reviews
                .save_document(payload.review_target_id, file, &extracted.text)
                .await?;
            fresh.push(snapshot.id);
        }

        let snapshots = if payload.document_snapshot_ids.is_empty() {
            self.stores
                .reviews
                .list_documents(payload.review_target_id)
                .await?
        } else {
            let mut ids = payload.document_snapshot_ids.clone();
            ids.extend(fresh);
            self.stores.reviews.get_documents(&ids).await?
        };

        let mut documents = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            match snapshot.extracted_text.clone() {
                Some(text) => documents.push((snapshot, text)),
                None => {
                    return Err(Error::Extraction(format!(
                        "document {} has no cached text",
                        snapshot.original_name
                    )))
                }
            }
        }
        if documents.is_empty() {
            return Err(Error::InvalidInput("review has no documents".into()));
        }
        Ok(documents)
    }

    /// Starting part count for a document: enough parts to respect the size
    /// limit, and never coarser than the split recorded by earlier passes.
    async fn initial_parts(&self, snapshot: &DocumentSnapshot, text: &str) -> Result<usize> {
        let by_size = text.chars().count().div_ceil(self.config.max_document_chars).max(1);
        let hint = self.cache.chunk_count_hint(snapshot.id).await?;
        Ok(by_size.max(hint).min(self.config.max_document_parts.max(1)))
    }

    /// Run every (chunk, part) call for one document, retrying the whole
    /// document with finer parts on context overflow.
    async fn review_document(
        &self,
        ctx: &TaskContext,
        document_index: usize,
        snapshot: &DocumentSnapshot,
        text: &str,
        chunks: &[ChecklistChunk<ChecklistPrompt>],
        progress: &mut ProgressTracker,
    ) -> Result<HashMap<Uuid, ItemOutcome>> {
        let max_parts = self.config.max_document_parts.max(1);
        let mut parts = self.initial_parts(snapshot, text).await?;

        loop {
            let mut texts = split_text_into_parts(text, parts);
            if texts.is_empty() {
                texts.push(String::new());
            }
            let total_parts = texts.len().max(1);
            let mut outcomes: HashMap<Uuid, ItemOutcome> = HashMap::new();
            let mut overflowed = false;
            let mut reported = 0;

            for chunk in chunks {
                for (part_index, part_text) in texts.iter().enumerate() {
                    let part = DocumentPart {
                        document_name: snapshot.original_name.clone(),
                        text: part_text.clone(),
                        part_index,
                        total_parts,
                    };
                    match self.model.review_chunk(&chunk.items, &part).await {
                        Ok(verdicts) => {
                            for item in &chunk.items {
                                let outcome = outcomes.entry(item.id).or_default();
                                match verdicts.iter().find(|v| v.checklist_item_id == item.id) {
                                    Some(v) => outcome.observations.push(Observation {
                                        document_index,
                                        part_index,
                                        total_parts,
                                        label: v.evaluation.trim().to_string(),
                                        comment: v.comment.clone(),
                                    }),
                                    None => outcome
                                        .errors
                                        .push("model returned no verdict for this item".into()),
                                }
                            }
                        }
                        Err(Error::ContextOverflow(msg)) if parts < max_parts => {
                            debug!(
                                document = %snapshot.original_name,
                                parts,
                                %msg,
                                "Context overflow, splitting document finer"
                            );
                            overflowed = true;
                            break;
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                document = %snapshot.original_name,
                                chunk_index = chunk.chunk_index,
                                part_index,
                                "Review call failed"
                            );
                            let message = e.to_string();
                            for item in &chunk.items {
                                outcomes
                                    .entry(item.id)
                                    .or_default()
                                    .errors
                                    .push(message.clone());
                            }
                        }
                    }
                }
                if overflowed {
                    break;
                }
                progress.chunk_done(ctx, &self.broker);
                reported += 1;
            }

            if !overflowed {
                return Ok(outcomes);
            }
            progress.rewind(reported);
            parts = (parts * 2).min(max_parts);
        }
    }

    async fn review(&self, ctx: &TaskContext, payload: &ReviewPayload) -> Result<ReviewSummary> {
        let target_id = payload.review_target_id;
        let items = if payload.refresh_checklist {
            let checklist = self
                .stores
                .reviews
                .list_checklist_items(payload.space_id)
                .await?;
            if checklist.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "space {} has no checklist items",
                    payload.space_id
                )));
            }
            // Drops the old snapshot's results and cache rows.
            self.stores
                .reviews
                .replace_target_items(target_id, &checklist)
                .await?
        } else {
            let mut items = self.stores.reviews.list_target_items(target_id).await?;
            if !payload.checklist_item_ids.is_empty() {
                items.retain(|i| payload.checklist_item_ids.contains(&i.id));
            }
            items
        };
        if items.is_empty() {
            return Err(Error::InvalidInput("no checklist items to review".into()));
        }

        let documents = self.load_documents(ctx, payload).await?;
        let prompts: Vec<ChecklistPrompt> = items
            .iter()
            .map(|i| ChecklistPrompt {
                id: i.id,
                content: i.content.clone(),
            })
            .collect();
        let chunks = split_into_chunks(&prompts, payload.max_checklist_chunk_size)?;
        debug!(
            item_count = prompts.len(),
            chunk_count = chunks.len(),
            document_count = documents.len(),
            "Review planned"
        );

        let mut progress = ProgressTracker::new(ctx, target_id, chunks.len() * documents.len());
        let mut merged: HashMap<Uuid, ItemOutcome> = HashMap::new();
        for (document_index, (snapshot, text)) in documents.iter().enumerate() {
            let outcomes = self
                .review_document(ctx, document_index, snapshot, text, &chunks, &mut progress)
                .await?;
            for (item_id, outcome) in outcomes {
                let entry = merged.entry(item_id).or_default();
                entry.observations.extend(outcome.observations);
                entry.errors.extend(outcome.errors);
            }
        }

        let labels = if payload.evaluation_labels.is_empty() {
            self.config.evaluation_labels.clone()
        } else {
            payload.evaluation_labels.clone()
        };

        let mut new_results = Vec::with_capacity(items.len());
        let mut evidence: HashMap<Uuid, ItemEvidence> = HashMap::new();
        for item in &items {
            let outcome = merged.remove(&item.id).unwrap_or_default();
            if let Some(error) = outcome.errors.first() {
                new_results.push(NewReviewResult::error(item.id, error.clone()));
                continue;
            }
            let Some(label) = merge_labels(outcome.observations.iter().map(|o| o.label.as_str()), &labels)
            else {
                new_results.push(NewReviewResult::error(item.id, "no verdict produced"));
                continue;
            };
            let item_evidence = build_evidence(item.id, &outcome.observations, &documents);
            new_results.push(NewReviewResult::success(
                item.id,
                label,
                aggregate_comment(&item_evidence),
            ));
            evidence.insert(item.id, item_evidence);
        }

        let saved = self.stores.reviews.upsert_results(target_id, new_results).await?;
        let mut entries = Vec::new();
        for result in &saved {
            let Some(item_evidence) = evidence.get(&result.checklist_item_id) else {
                continue;
            };
            for document in &item_evidence.documents {
                for chunk in &document.chunks {
                    entries.push(NewResultCacheEntry {
                        document_snapshot_id: document.document_snapshot_id,
                        result_id: result.id,
                        comment: chunk.comment.clone(),
                        total_chunks: chunk.total_chunks,
                        chunk_index: chunk.chunk_index,
                        per_chunk_label: chunk.label.clone(),
                    });
                }
            }
        }
        let result_ids: Vec<Uuid> = saved.iter().map(|r| r.id).collect();
        self.cache.replace_for_results(&result_ids, entries).await?;

        let failed_items = saved.iter().filter(|r| r.is_error()).count();
        let target_succeeded_items = self
            .stores
            .reviews
            .list_results(target_id)
            .await?
            .iter()
            .filter(|r| !r.is_error())
            .count();
        Ok(ReviewSummary {
            total_items: saved.len(),
            succeeded_items: saved.len() - failed_items,
            failed_items,
            documents: documents.len(),
            target_succeeded_items,
        })
    }

    async fn update_target(&self, target_id: Uuid, status: ReviewTargetStatus, error: Option<&str>) {
        if let Err(e) = self
            .stores
            .reviews
            .set_target_status(target_id, status, error)
            .await
        {
            warn!(error = %e, %target_id, ?status, "Failed to update review target status");
        }
    }
}

/// Evidence of one item, grouped by document in review order.
fn build_evidence(
    item_id: Uuid,
    observations: &[Observation],
    documents: &[(DocumentSnapshot, String)],
) -> ItemEvidence {
    let mut sorted: Vec<&Observation> = observations.iter().collect();
    sorted.sort_by_key(|o| (o.document_index, o.part_index));

    let mut evidence = ItemEvidence {
        checklist_item_id: item_id,
        documents: Vec::new(),
    };
    for o in sorted {
        let snapshot = &documents[o.document_index].0;
        if evidence
            .documents
            .last()
            .map_or(true, |d| d.document_snapshot_id != snapshot.id)
        {
            evidence.documents.push(DocumentEvidence {
                document_snapshot_id: snapshot.id,
                document_name: snapshot.original_name.clone(),
                chunks: Vec::new(),
            });
        }
        if let Some(document) = evidence.documents.last_mut() {
            document.chunks.push(ChunkComment {
                chunk_index: o.part_index as i32,
                total_chunks: o.total_parts as i32,
                label: Some(o.label.clone()),
                comment: o.comment.clone(),
            });
        }
    }
    evidence
}

/// Publishes `review-progress` after each item chunk.
struct ProgressTracker {
    task_id: Uuid,
    target_id: Uuid,
    done: usize,
    total: usize,
}

impl ProgressTracker {
    fn new(ctx: &TaskContext, target_id: Uuid, total: usize) -> Self {
        Self {
            task_id: ctx.task_id(),
            target_id,
            done: 0,
            total: total.max(1),
        }
    }

    fn chunk_done(&mut self, ctx: &TaskContext, broker: &Arc<dyn EventBroker>) {
        self.done = (self.done + 1).min(self.total);
        let percent = (self.done * 100 / self.total) as i32;
        ctx.report_progress(percent, Some("Reviewed checklist chunk"));
        broker.publish(
            ctx.user_id(),
            event_types::REVIEW_PROGRESS,
            json!({
                "task_id": self.task_id,
                "review_target_id": self.target_id,
                "completed_chunks": self.done,
                "total_chunks": self.total,
                "percent": percent,
            }),
        );
    }

    /// Forget chunks reported during a pass that is being repeated.
    fn rewind(&mut self, by: usize) {
        self.done = self.done.saturating_sub(by);
    }
}

#[async_trait]
impl TaskHandler for ReviewHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Review
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "review", task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        let start = Instant::now();
        let payload: ReviewPayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return TaskResult::Failed(format!("Invalid payload: {e}")),
        };
        let target_id = payload.review_target_id;
        self.update_target(target_id, ReviewTargetStatus::Reviewing, None)
            .await;

        match self.review(&ctx, &payload).await {
            Ok(summary) if summary.target_succeeded_items == 0 => {
                let message = format!(
                    "No checklist item could be evaluated ({} failed)",
                    summary.failed_items
                );
                self.update_target(target_id, ReviewTargetStatus::Error, Some(&message))
                    .await;
                TaskResult::Failed(message)
            }
            Ok(summary) => {
                self.update_target(target_id, ReviewTargetStatus::Completed, None)
                    .await;
                info!(
                    %target_id,
                    total_items = summary.total_items,
                    failed_items = summary.failed_items,
                    is_retry = payload.is_retry,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Review completed"
                );
                self.broker.publish(
                    ctx.user_id(),
                    event_types::REVIEW_COMPLETED,
                    json!({
                        "task_id": ctx.task_id(),
                        "review_target_id": target_id,
                        "total_items": summary.total_items,
                        "succeeded_items": summary.succeeded_items,
                        "failed_items": summary.failed_items,
                    }),
                );
                TaskResult::Success(serde_json::to_value(&summary).ok())
            }
            Err(e) => {
                let message = e.to_string();
                self.update_target(target_id, ReviewTargetStatus::Error, Some(&message))
                    .await;
                TaskResult::Failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewq_core::{defaults, CredentialHash, ReviewRepository, TaskRepository};

    use crate::queue::UploadedFile;
    use crate::extract::PlainTextExtractor;
    use crate::testing::{Harness, ScriptedReviewModel};

    fn labels() -> Vec<String> {
        vec!["A".into(), "B".into(), "C".into()]
    }

    #[test]
    fn test_merge_labels_picks_worst() {
        assert_eq!(merge_labels(["A", "C", "B"], &labels()).as_deref(), Some("C"));
        assert_eq!(merge_labels(["A", "A"], &labels()).as_deref(), Some("A"));
        assert_eq!(merge_labels(["B", "?"], &labels()).as_deref(), Some("?"));
        assert_eq!(merge_labels(std::iter::empty(), &labels()), None);
    }

    fn handler(h: &Harness, model: Arc<ScriptedReviewModel>, config: ReviewConfig) -> ReviewHandler {
        ReviewHandler::new(
            h.stores.clone(),
            h.broker.clone(),
            Arc::new(PlainTextExtractor),
            model,
            config,
        )
    }

    async fn start_review(h: &Harness, items: usize, text: &str) -> (Uuid, Vec<Uuid>, TaskContext) {
        start_review_chunked(h, items, text, defaults::MAX_CHECKLIST_CHUNK_SIZE).await
    }

    /// Like `start_review`, with `chunk_size` items per model call.
    async fn start_review_chunked(
        h: &Harness,
        items: usize,
        text: &str,
        chunk_size: i64,
    ) -> (Uuid, Vec<Uuid>, TaskContext) {
        let seeded = h.seed_target(items).await;
        let key = CredentialHash::from_credential("k");
        h.queue
            .request_review(
                key.clone(),
                "user-1",
                seeded.target.id,
                vec![UploadedFile::new("contract.txt", text.as_bytes().to_vec())],
            )
            .await
            .unwrap();
        let mut task = h.store.dequeue_next(&key).await.unwrap().unwrap();
        // The seeded snapshot already mirrors the space checklist; keep its ids.
        let mut payload: ReviewPayload = task.payload_as().unwrap();
        payload.refresh_checklist = false;
        payload.max_checklist_chunk_size = chunk_size;
        task.payload = serde_json::to_value(&payload).unwrap();
        let snapshot: Vec<Uuid> = h
            .store
            .list_target_items(seeded.target.id)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        (seeded.target.id, snapshot, TaskContext::new(task))
    }

    #[tokio::test]
    async fn test_chunks_checklist_equally() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new());
        let handler = handler(&h, model.clone(), ReviewConfig::default());
        let (target_id, _, ctx) = start_review(&h, 137, "one line\n").await;

        let result = handler.execute(ctx).await;
        assert!(matches!(result, TaskResult::Success(_)));
        assert_eq!(model.chunk_sizes(), vec![46, 46, 45]);

        let results = h.store.list_results(target_id).await.unwrap();
        assert_eq!(results.len(), 137);
        assert!(results.iter().all(|r| r.evaluation.as_deref() == Some("A")));
        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Completed);
        assert_eq!(h.events_of(event_types::REVIEW_PROGRESS).len(), 3);
        assert_eq!(h.events_of(event_types::REVIEW_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_completes_with_error_rows() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new());
        let handler = handler(&h, model.clone(), ReviewConfig::default());
        let (target_id, items, ctx) = start_review_chunked(&h, 4, "text\n", 2).await;
        model.fail_items(&[items[3]], "upstream timeout");

        let result = handler.execute(ctx).await;
        assert!(matches!(result, TaskResult::Success(_)));

        let results = h.store.list_results(target_id).await.unwrap();
        let errors: Vec<_> = results.iter().filter(|r| r.is_error()).collect();
        // items[2] shares the failing chunk with items[3]
        assert_eq!(errors.len(), 2);
        assert!(errors[0].error_message.as_deref().unwrap().contains("upstream timeout"));
        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Completed);
    }

    #[tokio::test]
    async fn test_total_failure_fails_task_and_marks_target_error() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new());
        let handler = handler(&h, model.clone(), ReviewConfig::default());
        let (target_id, items, ctx) = start_review(&h, 2, "text\n").await;
        model.fail_items(&items, "model down");

        let result = handler.execute(ctx).await;
        assert!(matches!(result, TaskResult::Failed(_)));
        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Error);
        assert_eq!(
            h.store.list_results(target_id).await.unwrap().iter().filter(|r| r.is_error()).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_worst_label_across_parts_and_cache_rows() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new().with_label_for_text("penalty", "C"));
        let handler = handler(&h, model.clone(), ReviewConfig::default().with_max_document_chars(12));
        let text = "intro line\nno penalty\nclosing\n";
        let (target_id, items, ctx) = start_review(&h, 1, text).await;

        assert!(matches!(handler.execute(ctx).await, TaskResult::Success(_)));

        let results = h.store.list_results(target_id).await.unwrap();
        assert_eq!(results[0].evaluation.as_deref(), Some("C"));
        assert!(results[0].comment.as_deref().unwrap().contains("(part 1/3)"));

        let cache = ResultCache::new(h.stores.result_cache.clone());
        let evidence = cache.find_for_items(&[items[0]]).await.unwrap();
        let chunks = &evidence[0].documents[0].chunks;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].label.as_deref(), Some("C"));
        let doc = evidence[0].documents[0].document_snapshot_id;
        assert_eq!(cache.chunk_count_hint(doc).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_context_overflow_doubles_parts() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new().with_overflow_above(20));
        let handler = handler(&h, model.clone(), ReviewConfig::default());
        let text = "aaaaaaaaaa\nbbbbbbbbbb\ncccccccccc\ndddddddddd\n";
        let (target_id, _, ctx) = start_review(&h, 1, text).await;

        assert!(matches!(handler.execute(ctx).await, TaskResult::Success(_)));
        // 44 chars: 1 part overflows, 2 parts (22 chars) overflow, 4 parts fit
        assert_eq!(model.part_counts_seen(), vec![1, 2, 4]);
        let results = h.store.list_results(target_id).await.unwrap();
        assert!(!results[0].is_error());
    }

    #[tokio::test]
    async fn test_overflow_at_part_ceiling_becomes_error_row() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new().with_overflow_above(5));
        let handler = handler(&h, model, ReviewConfig::default().with_max_document_parts(2));
        let (target_id, _, ctx) = start_review(&h, 1, "0123456789\nabcdefghij\n").await;

        assert!(matches!(handler.execute(ctx).await, TaskResult::Failed(_)));
        let results = h.store.list_results(target_id).await.unwrap();
        assert!(results[0].error_message.as_deref().unwrap().contains("Context overflow"));
    }

    #[tokio::test]
    async fn test_scoped_items_leave_other_rows_untouched() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new());
        let handler = handler(&h, model.clone(), ReviewConfig::default());
        let (target_id, items, ctx) = start_review(&h, 3, "text\n").await;
        let first = ctx.task_id();
        assert!(matches!(handler.execute(ctx).await, TaskResult::Success(_)));
        h.store.complete(first).await.unwrap();
        let before = h.store.list_results(target_id).await.unwrap();

        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        let mut payload = ReviewPayload::new(target_id, target.space_id, "user-1");
        payload.checklist_item_ids = vec![items[1]];
        payload.document_snapshot_ids = h
            .store
            .list_documents(target_id)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        payload.is_retry = true;
        let key = CredentialHash::from_credential("k");
        let task = reviewq_core::NewTask::new(TaskType::Review, key.clone(), target_id, "user-1", &payload)
            .unwrap();
        h.store.create(task).await.unwrap();
        let task = h.store.dequeue_next(&key).await.unwrap().unwrap();
        model.set_default_label("B");

        assert!(matches!(handler.execute(TaskContext::new(task)).await, TaskResult::Success(_)));
        let after = h.store.list_results(target_id).await.unwrap();
        assert_eq!(after[0].updated_at, before[0].updated_at);
        assert_eq!(after[1].evaluation.as_deref(), Some("B"));
        assert_eq!(after[2].evaluation.as_deref(), Some("A"));
        // the retry reused the cached text: no new document snapshot
        assert_eq!(h.store.list_documents(target_id).await.unwrap().len(), 1);
    }

    /// Run the next queued review through `handler` and finish the task the
    /// way the worker would.
    async fn run_next(h: &Harness, handler: &ReviewHandler) -> TaskResult {
        let key = CredentialHash::from_credential("k");
        let task = h.store.dequeue_next(&key).await.unwrap().unwrap();
        let task_id = task.id;
        let result = handler.execute(TaskContext::new(task)).await;
        match &result {
            TaskResult::Failed(message) => h.store.fail(task_id, message).await.unwrap(),
            _ => h.store.complete(task_id).await.unwrap(),
        }
        result
    }

    #[tokio::test]
    async fn test_repeat_review_starts_from_recorded_split() {
        let h = Harness::new();
        let text = "aaaaaaaaaa\nbbbbbbbbbb\ncccccccccc\ndddddddddd\n";
        let first_model = Arc::new(ScriptedReviewModel::new().with_overflow_above(20));
        let first = handler(&h, first_model.clone(), ReviewConfig::default());
        let (target_id, _, ctx) = start_review(&h, 2, text).await;
        let task_id = ctx.task_id();
        assert!(matches!(first.execute(ctx).await, TaskResult::Success(_)));
        h.store.complete(task_id).await.unwrap();
        assert_eq!(first_model.part_counts_seen(), vec![1, 2, 4]);

        // A fresh request re-copies the checklist, dropping the old results.
        h.queue
            .request_review(CredentialHash::from_credential("k"), "user-1", target_id, vec![])
            .await
            .unwrap();
        let second_model = Arc::new(ScriptedReviewModel::new().with_overflow_above(20));
        let second = handler(&h, second_model.clone(), ReviewConfig::default());
        assert!(matches!(run_next(&h, &second).await, TaskResult::Success(_)));

        assert_eq!(second_model.part_counts_seen(), vec![4]);
        assert_eq!(h.store.list_results(target_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_new_checklist_items() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new());
        let handler = handler(&h, model, ReviewConfig::default());
        let (target_id, _, ctx) = start_review(&h, 2, "text\n").await;
        let task_id = ctx.task_id();
        assert!(matches!(handler.execute(ctx).await, TaskResult::Success(_)));
        h.store.complete(task_id).await.unwrap();

        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        h.store
            .append_checklist_items(target.space_id, &["Late addition".to_string()])
            .await
            .unwrap();
        h.queue
            .request_review(CredentialHash::from_credential("k"), "user-1", target_id, vec![])
            .await
            .unwrap();
        // Still the old snapshot while queued.
        assert_eq!(h.store.list_target_items(target_id).await.unwrap().len(), 2);

        assert!(matches!(run_next(&h, &handler).await, TaskResult::Success(_)));
        let snapshot = h.store.list_target_items(target_id).await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[2].content, "Late addition");
        assert_eq!(h.store.list_results(target_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_retry_keeps_target_completed_with_good_rows() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new());
        let handler = handler(&h, model.clone(), ReviewConfig::default());
        let (target_id, items, ctx) = start_review_chunked(&h, 4, "text\n", 2).await;
        let task_id = ctx.task_id();
        model.fail_items(&[items[3]], "upstream timeout");
        assert!(matches!(handler.execute(ctx).await, TaskResult::Success(_)));
        h.store.complete(task_id).await.unwrap();

        // Retry only the two error rows; they fail again.
        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        let mut payload = ReviewPayload::new(target_id, target.space_id, "user-1");
        payload.checklist_item_ids = vec![items[2], items[3]];
        payload.is_retry = true;
        let key = CredentialHash::from_credential("k");
        let task = reviewq_core::NewTask::new(TaskType::Review, key, target_id, "user-1", &payload)
            .unwrap();
        h.store.create(task).await.unwrap();

        match run_next(&h, &handler).await {
            TaskResult::Success(Some(value)) => {
                let summary: ReviewSummary = serde_json::from_value(value).unwrap();
                assert_eq!(summary.succeeded_items, 0);
                assert_eq!(summary.failed_items, 2);
                assert_eq!(summary.target_succeeded_items, 2);
            }
            _ => panic!("retry with surviving good rows should complete"),
        }
        let target = h.store.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(target.status, ReviewTargetStatus::Completed);
        let results = h.store.list_results(target_id).await.unwrap();
        assert_eq!(results.iter().filter(|r| !r.is_error()).count(), 2);
    }
}
