//! Caller-initiated retry of a review target.
//!
//! Nothing retries automatically. A retry re-submits either the target's
//! error rows or every row, optionally after refreshing the target's
//! checklist snapshot from the space, and reuses the text already extracted
//! for the target's documents.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use reviewq_core::{
    defaults, CredentialHash, Error, NewTask, Result, RetryOutcome, RetryScope, ReviewPayload,
    ReviewTargetStatus, TaskType,
};

use crate::config::ReviewConfig;
use crate::queue::TaskQueue;
use crate::stores::Stores;

/// Plans and enqueues retries.
#[derive(Clone)]
pub struct RetryCoordinator {
    stores: Stores,
    queue: Arc<TaskQueue>,
    review: ReviewConfig,
}

impl RetryCoordinator {
    pub fn new(stores: Stores, queue: Arc<TaskQueue>, review: ReviewConfig) -> Self {
        Self {
            stores,
            queue,
            review,
        }
    }

    /// Retry the target's `scope` (`"failed"` or `"all"`).
    ///
    /// With `use_latest_checklist` every item of the space's current
    /// checklist is re-run; that combination requires scope `all`. The task
    /// replaces the target's snapshot when it runs, and result rows of items
    /// dropped from the checklist go away with the old snapshot then.
    #[instrument(skip(self, credential_hash), fields(subsystem = "jobs", component = "retry", op = "retry"))]
    pub async fn retry(
        &self,
        credential_hash: CredentialHash,
        user_id: &str,
        target_id: Uuid,
        scope: &str,
        use_latest_checklist: bool,
    ) -> Result<RetryOutcome> {
        let scope = RetryScope::from_str(scope)?;
        if use_latest_checklist && scope == RetryScope::Failed {
            return Err(Error::InvalidInput(
                "use_latest_checklist requires scope \"all\"".into(),
            ));
        }

        let target = self
            .stores
            .reviews
            .get_target(target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("review target {target_id}")))?;
        let queued = self
            .queue
            .check_admission(&credential_hash, TaskType::Review, target_id)
            .await?;

        let documents = self.stores.reviews.list_documents(target_id).await?;
        if documents.is_empty() {
            return Err(Error::InvalidInput(format!(
                "review target {target_id} has no cached documents"
            )));
        }

        // An empty id list on a refreshing retry means the whole new snapshot.
        let (snapshot_len, item_ids) = if use_latest_checklist {
            let checklist = self
                .stores
                .reviews
                .list_checklist_items(target.space_id)
                .await?;
            if checklist.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "space {} has no checklist items",
                    target.space_id
                )));
            }
            (checklist.len(), Vec::new())
        } else {
            let snapshot = self.stores.reviews.list_target_items(target_id).await?;
            let results = self.stores.reviews.list_results(target_id).await?;
            let ids: Vec<Uuid> = match scope {
                RetryScope::Failed => results
                    .iter()
                    .filter(|r| r.is_error())
                    .map(|r| r.checklist_item_id)
                    .collect(),
                RetryScope::All if results.is_empty() => snapshot.iter().map(|i| i.id).collect(),
                RetryScope::All => results.iter().map(|r| r.checklist_item_id).collect(),
            };
            if ids.is_empty() {
                return Err(Error::InvalidInput(match scope {
                    RetryScope::Failed => format!("review target {target_id} has no failed items"),
                    RetryScope::All => format!("review target {target_id} has no checklist items"),
                }));
            }
            (snapshot.len(), ids)
        };
        let selected = if item_ids.is_empty() {
            snapshot_len
        } else {
            item_ids.len()
        };

        let mut payload = ReviewPayload::new(target_id, target.space_id, user_id);
        payload.checklist_item_ids = item_ids;
        payload.document_snapshot_ids = documents.iter().map(|d| d.id).collect();
        payload.evaluation_labels = self.review.evaluation_labels.clone();
        payload.max_checklist_chunk_size = self.review.max_checklist_chunk_size;
        payload.is_retry = true;
        payload.refresh_checklist = use_latest_checklist;

        let task = NewTask::new(TaskType::Review, credential_hash, target_id, user_id, &payload)?
            .with_priority(defaults::RETRY_PRIORITY);
        let receipt = self
            .queue
            .enqueue_for_target(task, Vec::new(), target.status, queued)
            .await?;

        info!(
            %target_id,
            task_id = %receipt.task_id,
            ?scope,
            use_latest_checklist,
            retry_items = selected,
            "Retry enqueued"
        );

        Ok(RetryOutcome {
            target_id,
            task_id: receipt.task_id,
            status: ReviewTargetStatus::Queued,
            total_items: snapshot_len,
            retry_items: selected,
        })
    }
}
