//! Checklist generation: extract uploaded documents and ask the model for
//! checklist items.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument, warn};

use reviewq_core::{
    event_types, ChecklistGenerationPayload, DocumentPart, Error, EventBroker, ProcessMode,
    Result, ReviewModel, TaskType, TextExtractor,
};

use crate::handler::{TaskContext, TaskHandler, TaskResult};
use crate::stores::Stores;

/// Handler for [`TaskType::ChecklistGeneration`].
///
/// Any failure fails the task and leaves the message on the space as its
/// checklist-generation error.
pub struct ChecklistGenerationHandler {
    stores: Stores,
    broker: Arc<dyn EventBroker>,
    extractor: Arc<dyn TextExtractor>,
    model: Arc<dyn ReviewModel>,
}

impl ChecklistGenerationHandler {
    pub fn new(
        stores: Stores,
        broker: Arc<dyn EventBroker>,
        extractor: Arc<dyn TextExtractor>,
        model: Arc<dyn ReviewModel>,
    ) -> Self {
        Self {
            stores,
            broker,
            extractor,
            model,
        }
    }

    async fn generate(&self, ctx: &TaskContext, payload: &ChecklistGenerationPayload) -> Result<usize> {
        let files = self.stores.files.list_for_task(ctx.task_id()).await?;
        if files.is_empty() {
            return Err(Error::InvalidInput("task has no uploaded documents".into()));
        }

        let total = files.len();
        let mut documents = Vec::with_capacity(total);
        for (i, file) in files.iter().enumerate() {
            let data = self.stores.uploads.read(ctx.task_id(), file.id).await?;
            let extracted = self.extractor.extract(file, &data).await?;
            if file.process_mode == ProcessMode::Image && extracted.converted_image_count > 0 {
                self.stores
                    .files
                    .set_converted_image_count(file.id, extracted.converted_image_count)
                    .await?;
            }
            documents.push(DocumentPart {
                document_name: file.original_name.clone(),
                text: extracted.text,
                part_index: 0,
                total_parts: 1,
            });

            ctx.report_progress(((i + 1) * 50 / total) as i32, Some("Extracted document"));
            self.broker.publish(
                ctx.user_id(),
                event_types::CHECKLIST_PROGRESS,
                json!({
                    "task_id": ctx.task_id(),
                    "space_id": payload.space_id,
                    "stage": "extracting",
                    "current": i + 1,
                    "total": total,
                }),
            );
        }

        self.broker.publish(
            ctx.user_id(),
            event_types::CHECKLIST_PROGRESS,
            json!({
                "task_id": ctx.task_id(),
                "space_id": payload.space_id,
                "stage": "generating",
                "current": total,
                "total": total,
            }),
        );
        let proposed = self
            .model
            .generate_checklist(&documents, payload.requirements.as_deref())
            .await?;
        let contents: Vec<String> = proposed
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if contents.is_empty() {
            return Err(Error::Inference("model proposed no checklist items".into()));
        }

        let created = self
            .stores
            .reviews
            .append_checklist_items(payload.space_id, &contents)
            .await?;
        ctx.report_progress(100, Some("Checklist generated"));
        Ok(created.len())
    }
}

#[async_trait]
impl TaskHandler for ChecklistGenerationHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ChecklistGeneration
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", component = "checklist_generation", task_id = %ctx.task_id()))]
    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        let payload: ChecklistGenerationPayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return TaskResult::Failed(format!("Invalid payload: {e}")),
        };

        match self.generate(&ctx, &payload).await {
            Ok(item_count) => {
                info!(space_id = %payload.space_id, item_count, "Checklist generated");
                self.broker.publish(
                    ctx.user_id(),
                    event_types::CHECKLIST_COMPLETED,
                    json!({
                        "task_id": ctx.task_id(),
                        "space_id": payload.space_id,
                        "item_count": item_count,
                    }),
                );
                TaskResult::Success(Some(json!({ "item_count": item_count })))
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(annotate) = self
                    .stores
                    .reviews
                    .set_generation_error(payload.space_id, Some(&message))
                    .await
                {
                    warn!(error = %annotate, space_id = %payload.space_id, "Failed to record generation error");
                }
                TaskResult::Failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewq_core::{CredentialHash, ReviewRepository, TaskRepository};

    use crate::queue::UploadedFile;
    use crate::extract::PlainTextExtractor;
    use crate::testing::{Harness, ScriptedReviewModel};

    async fn queued_generation(h: &Harness, files: Vec<UploadedFile>) -> (uuid::Uuid, TaskContext) {
        let space = h.store.create_space("Contracts").await.unwrap();
        let key = CredentialHash::from_credential("k");
        h.queue
            .request_checklist_generation(key.clone(), "user-1", space.id, Some("GDPR".into()), files)
            .await
            .unwrap();
        let task = h.store.dequeue_next(&key).await.unwrap().unwrap();
        (space.id, TaskContext::new(task))
    }

    #[tokio::test]
    async fn test_generates_and_appends_items() {
        let h = Harness::new();
        let model = Arc::new(ScriptedReviewModel::new().with_checklist(vec![
            "Data retention period stated",
            "  ",
            "Processor named",
        ]));
        let handler = ChecklistGenerationHandler::new(
            h.stores.clone(),
            h.broker.clone(),
            Arc::new(PlainTextExtractor),
            model.clone(),
        );
        let (space_id, ctx) = queued_generation(
            &h,
            vec![UploadedFile::new("policy.txt", b"We keep data 30 days.".to_vec())],
        )
        .await;

        let result = handler.execute(ctx).await;
        assert!(matches!(result, TaskResult::Success(Some(ref v)) if v["item_count"] == 2));

        let items = h.store.list_checklist_items(space_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].content, "Processor named");
        assert_eq!(model.last_requirements().as_deref(), Some("GDPR"));
        assert_eq!(h.events_of(event_types::CHECKLIST_COMPLETED).len(), 1);
        assert!(h.events_of(event_types::CHECKLIST_PROGRESS).len() >= 2);
    }

    #[tokio::test]
    async fn test_model_failure_annotates_space() {
        let h = Harness::new();
        let handler = ChecklistGenerationHandler::new(
            h.stores.clone(),
            h.broker.clone(),
            Arc::new(PlainTextExtractor),
            Arc::new(ScriptedReviewModel::new().with_checklist_error("rate limited")),
        );
        let (space_id, ctx) =
            queued_generation(&h, vec![UploadedFile::new("a.txt", b"text".to_vec())]).await;

        let result = handler.execute(ctx).await;
        assert!(matches!(result, TaskResult::Failed(ref m) if m.contains("rate limited")));
        let space = h.store.get_space(space_id).await.unwrap().unwrap();
        assert!(space
            .checklist_generation_error
            .unwrap()
            .contains("rate limited"));
        assert!(h.store.list_checklist_items(space_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_task() {
        let h = Harness::new();
        let handler = ChecklistGenerationHandler::new(
            h.stores.clone(),
            h.broker.clone(),
            Arc::new(PlainTextExtractor),
            Arc::new(ScriptedReviewModel::new()),
        );
        let (space_id, ctx) = queued_generation(
            &h,
            vec![UploadedFile::new("scan.pdf", vec![0xff, 0xfe, 0x00])],
        )
        .await;

        assert!(matches!(handler.execute(ctx).await, TaskResult::Failed(_)));
        let space = h.store.get_space(space_id).await.unwrap().unwrap();
        assert!(space.checklist_generation_error.is_some());
    }
}
