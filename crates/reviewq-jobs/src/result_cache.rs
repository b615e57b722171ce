//! Chunked review evidence and the Q&A workflow that replays it.
//!
//! Every model call of a review writes one cache row per (document, checklist
//! item, chunk). Q&A reads those rows back in document and chunk order, so an
//! answer is grounded on exactly the evidence the review saw, and a repeat
//! review starts from the finest split ever recorded for a document.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reviewq_core::{
    event_types, BrokerEvent, CachedComment, ChunkComment, DocumentEvidence, Error, EventBroker,
    ItemEvidence, NewResultCacheEntry, QaModel, Result, ResultCacheEntry, ResultCacheRepository,
};

use crate::stores::Stores;

/// Service over [`ResultCacheRepository`].
#[derive(Clone)]
pub struct ResultCache {
    repo: Arc<dyn ResultCacheRepository>,
}

impl ResultCache {
    pub fn new(repo: Arc<dyn ResultCacheRepository>) -> Self {
        Self { repo }
    }

    pub async fn save(&self, entry: NewResultCacheEntry) -> Result<ResultCacheEntry> {
        self.repo.save(entry).await
    }

    pub async fn save_many(&self, entries: Vec<NewResultCacheEntry>) -> Result<Vec<ResultCacheEntry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.save_many(entries).await
    }

    /// Swap the cached evidence of `result_ids` for `entries` in one step.
    pub async fn replace_for_results(
        &self,
        result_ids: &[Uuid],
        entries: Vec<NewResultCacheEntry>,
    ) -> Result<Vec<ResultCacheEntry>> {
        self.repo.replace_for_results(result_ids, entries).await
    }

    /// Evidence per checklist item, in the order of `item_ids`. Items with no
    /// cached output are omitted.
    pub async fn find_for_items(&self, item_ids: &[Uuid]) -> Result<Vec<ItemEvidence>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let comments = self.repo.find_comments_for_items(item_ids).await?;
        let mut grouped = group_evidence(comments);
        grouped.sort_by_key(|e| {
            item_ids
                .iter()
                .position(|id| *id == e.checklist_item_id)
                .unwrap_or(usize::MAX)
        });
        Ok(grouped)
    }

    /// Finest split any review of the document used; at least 1.
    pub async fn chunk_count_hint(&self, document_snapshot_id: Uuid) -> Result<usize> {
        let max = self.repo.max_total_chunks(document_snapshot_id).await?;
        Ok(max
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(1)
            .max(1))
    }
}

/// Fold ordered cache rows into per-item, per-document evidence.
pub fn group_evidence(comments: Vec<CachedComment>) -> Vec<ItemEvidence> {
    let mut items: Vec<ItemEvidence> = Vec::new();
    for c in comments {
        let item = match items.iter().position(|e| e.checklist_item_id == c.checklist_item_id) {
            Some(i) => &mut items[i],
            None => {
                items.push(ItemEvidence {
                    checklist_item_id: c.checklist_item_id,
                    documents: Vec::new(),
                });
                let last = items.len() - 1;
                &mut items[last]
            }
        };
        let document = match item
            .documents
            .iter()
            .position(|d| d.document_snapshot_id == c.document_snapshot_id)
        {
            Some(i) => &mut item.documents[i],
            None => {
                item.documents.push(DocumentEvidence {
                    document_snapshot_id: c.document_snapshot_id,
                    document_name: c.document_name.clone(),
                    chunks: Vec::new(),
                });
                let last = item.documents.len() - 1;
                &mut item.documents[last]
            }
        };
        document.chunks.push(ChunkComment {
            chunk_index: c.chunk_index,
            total_chunks: c.total_chunks,
            label: c.per_chunk_label,
            comment: c.comment,
        });
    }
    items
}

/// Render one item's evidence as a single comment, one block per chunk.
///
/// Chunks of a document reviewed whole are headed `[name]`; parts of a split
/// document are headed `[name (part i/n)]`.
pub fn aggregate_comment(evidence: &ItemEvidence) -> String {
    let mut blocks = Vec::new();
    for document in &evidence.documents {
        for chunk in &document.chunks {
            let header = if chunk.total_chunks > 1 {
                format!(
                    "[{} (part {}/{})]",
                    document.document_name,
                    chunk.chunk_index + 1,
                    chunk.total_chunks
                )
            } else {
                format!("[{}]", document.document_name)
            };
            blocks.push(format!("{header}\n{}", chunk.comment.trim()));
        }
    }
    blocks.join("\n\n")
}

/// Channel a Q&A session broadcasts on.
pub fn qa_channel(session_id: Uuid) -> String {
    format!("qa:{session_id}")
}

/// A question about a reviewed target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRequest {
    pub review_target_id: Uuid,
    pub question: String,
    /// Restrict the evidence to these snapshot items; empty means all.
    #[serde(default)]
    pub checklist_item_ids: Vec<Uuid>,
    /// Rendezvous id chosen by a client that already listens on the channel.
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// Handle returned when a Q&A workflow starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaSession {
    pub session_id: Uuid,
    pub channel: String,
}

/// Runs streaming Q&A over cached review evidence.
#[derive(Clone)]
pub struct QaRunner {
    stores: Stores,
    cache: ResultCache,
    broker: Arc<dyn EventBroker>,
    model: Arc<dyn QaModel>,
}

impl QaRunner {
    pub fn new(stores: Stores, broker: Arc<dyn EventBroker>, model: Arc<dyn QaModel>) -> Self {
        Self {
            cache: ResultCache::new(stores.result_cache.clone()),
            stores,
            broker,
            model,
        }
    }

    /// Validate the request and spawn the answer workflow.
    ///
    /// Events go to `qa:<session_id>`: any number of `qa-delta`, then exactly
    /// one of `qa-done` or `qa-error`.
    pub async fn start(&self, request: QaRequest) -> Result<QaSession> {
        if request.question.trim().is_empty() {
            return Err(Error::InvalidInput("question must not be empty".into()));
        }
        self.stores
            .reviews
            .get_target(request.review_target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("review target {}", request.review_target_id)))?;

        let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
        let session = QaSession {
            session_id,
            channel: qa_channel(session_id),
        };

        let runner = self.clone();
        let channel = session.channel.clone();
        tokio::spawn(async move {
            runner.run(session_id, &channel, request).await;
        });

        info!(
            subsystem = "jobs",
            component = "qa",
            op = "start",
            %session_id,
            "Q&A session started"
        );
        Ok(session)
    }

    async fn run(&self, session_id: Uuid, channel: &str, request: QaRequest) {
        let context = match self.build_context(&request).await {
            Ok(context) => context,
            Err(e) => {
                self.emit_error(session_id, channel, &e);
                return;
            }
        };

        let mut stream = match self.model.answer(&request.question, &context).await {
            Ok(stream) => stream,
            Err(e) => {
                self.emit_error(session_id, channel, &e);
                return;
            }
        };

        let mut answer = String::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(delta) => {
                    answer.push_str(&delta);
                    self.broker.broadcast(
                        channel,
                        BrokerEvent::new(
                            event_types::QA_DELTA,
                            json!({ "session_id": session_id, "delta": delta }),
                        ),
                    );
                }
                Err(e) => {
                    self.emit_error(session_id, channel, &e);
                    return;
                }
            }
        }

        self.broker.broadcast(
            channel,
            BrokerEvent::new(
                event_types::QA_DONE,
                json!({ "session_id": session_id, "answer": answer }),
            ),
        );
        debug!(%session_id, answer_len = answer.len(), "Q&A session finished");
    }

    fn emit_error(&self, session_id: Uuid, channel: &str, error: &Error) {
        warn!(
            subsystem = "jobs",
            component = "qa",
            %session_id,
            error = %error,
            "Q&A session failed"
        );
        self.broker.broadcast(
            channel,
            BrokerEvent::new(
                event_types::QA_ERROR,
                json!({ "session_id": session_id, "message": error.to_string() }),
            ),
        );
    }

    /// Checklist items with their verdicts and replayed chunk evidence.
    async fn build_context(&self, request: &QaRequest) -> Result<String> {
        let mut items = self
            .stores
            .reviews
            .list_target_items(request.review_target_id)
            .await?;
        if !request.checklist_item_ids.is_empty() {
            items.retain(|i| request.checklist_item_ids.contains(&i.id));
        }
        if items.is_empty() {
            return Err(Error::InvalidInput(
                "no checklist items match the question".into(),
            ));
        }

        let results = self
            .stores
            .reviews
            .list_results(request.review_target_id)
            .await?;
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let evidence = self.cache.find_for_items(&ids).await?;

        let mut sections = Vec::with_capacity(items.len());
        for item in &items {
            let mut section = format!("Checklist item: {}", item.content);
            if let Some(result) = results.iter().find(|r| r.checklist_item_id == item.id) {
                if let Some(evaluation) = &result.evaluation {
                    section.push_str(&format!("\nEvaluation: {evaluation}"));
                }
                if let Some(error) = &result.error_message {
                    section.push_str(&format!("\nReview error: {error}"));
                }
            }
            if let Some(e) = evidence.iter().find(|e| e.checklist_item_id == item.id) {
                section.push('\n');
                section.push_str(&aggregate_comment(e));
            }
            sections.push(section);
        }
        Ok(sections.join("\n\n---\n\n"))
    }
}
