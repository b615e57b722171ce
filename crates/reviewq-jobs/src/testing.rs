//! Test doubles and an in-memory harness for queue services and handlers.
//!
//! Compiled into the library so integration tests and downstream crates can
//! drive the services without PostgreSQL or a model backend.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

use reviewq_core::{
    new_v7, BrokerEvent, ChecklistPrompt, DocumentPart, Error, EventBroker, EventCallback,
    FileMetadata, InMemoryEventBroker, ItemVerdict, ProcessMode, QaModel, Result, ReviewModel,
    SubscriptionId,
};
use reviewq_db::test_fixtures::{seed_review_target, SeededTarget};
use reviewq_db::{MemoryStore, MemoryUploadStore};

use crate::config::QueueConfig;
use crate::queue::TaskQueue;
use crate::stores::Stores;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Broker that records every published or broadcast event before fanning it
/// out through an [`InMemoryEventBroker`].
#[derive(Default)]
pub struct RecordingBroker {
    inner: InMemoryEventBroker,
    log: Mutex<Vec<BrokerEvent>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in publication order.
    pub fn events(&self) -> Vec<BrokerEvent> {
        lock(&self.log).clone()
    }
}

impl EventBroker for RecordingBroker {
    fn subscribe(&self, user_id: &str, event_type: &str, callback: EventCallback) -> SubscriptionId {
        self.inner.subscribe(user_id, event_type, callback)
    }

    fn publish(&self, user_id: &str, event_type: &str, data: JsonValue) -> usize {
        lock(&self.log).push(BrokerEvent::new(event_type, data.clone()));
        self.inner.publish(user_id, event_type, data)
    }

    fn subscribe_channel(&self, channel: &str, callback: EventCallback) -> SubscriptionId {
        self.inner.subscribe_channel(channel, callback)
    }

    fn broadcast(&self, channel: &str, event: BrokerEvent) -> usize {
        lock(&self.log).push(event.clone());
        self.inner.broadcast(channel, event)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id)
    }

    fn unsubscribe_all(&self, user_id: &str) {
        self.inner.unsubscribe_all(user_id)
    }

    fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

/// In-memory stores, a recording broker and a queue wired together.
pub struct Harness {
    pub store: MemoryStore,
    pub uploads: MemoryUploadStore,
    pub broker: Arc<RecordingBroker>,
    pub stores: Stores,
    pub queue: TaskQueue,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_queue_config(QueueConfig::default())
    }

    pub fn with_queue_config(config: QueueConfig) -> Self {
        let store = MemoryStore::new();
        let uploads = MemoryUploadStore::new();
        let broker = Arc::new(RecordingBroker::new());
        let stores = Stores::in_memory(store.clone(), uploads.clone());
        let queue = TaskQueue::new(stores.clone(), broker.clone(), config);
        Self {
            store,
            uploads,
            broker,
            stores,
            queue,
        }
    }

    /// Space plus target whose snapshot holds `item_count` items.
    pub async fn seed_target(&self, item_count: usize) -> SeededTarget {
        seed_review_target(&self.store, item_count).await
    }

    /// Recorded events of one type.
    pub fn events_of(&self, event_type: &str) -> Vec<BrokerEvent> {
        self.broker
            .events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Subscribe to a channel and forward its events into a receiver.
    pub fn listen_channel(&self, channel: &str) -> (UnboundedReceiver<BrokerEvent>, SubscriptionId) {
        let (tx, rx) = unbounded_channel();
        let id = self.broker.subscribe_channel(
            channel,
            Arc::new(move |event: &BrokerEvent| {
                tx.send(event.clone())
                    .map_err(|_| Error::Internal("listener closed".into()))
            }),
        );
        (rx, id)
    }

    /// Drain `rx` until an event of `terminal` type arrives or `within` elapses.
    pub async fn collect_until(
        &self,
        mut rx: UnboundedReceiver<BrokerEvent>,
        terminal: &str,
        within: Duration,
    ) -> Vec<BrokerEvent> {
        let deadline = tokio::time::Instant::now() + within;
        let mut collected = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            let done = event.event_type == terminal;
            collected.push(event);
            if done {
                break;
            }
        }
        collected
    }
}

/// Text-mode file descriptor detached from any task.
pub fn file_metadata(name: &str) -> FileMetadata {
    FileMetadata {
        id: new_v7(),
        task_id: Uuid::new_v4(),
        original_name: name.to_string(),
        mime_hint: None,
        size_bytes: 0,
        process_mode: ProcessMode::Text,
        converted_image_count: 0,
    }
}

#[derive(Default)]
struct ReviewScript {
    checklist: Option<std::result::Result<Vec<String>, String>>,
    default_label: String,
    labels_for_text: Vec<(String, String)>,
    overflow_above: Option<usize>,
    failing_items: HashSet<Uuid>,
    failure_message: String,
    last_requirements: Option<String>,
    chunk_sizes: Vec<usize>,
    part_counts: Vec<usize>,
}

/// [`ReviewModel`] with scripted answers that records what it was asked.
pub struct ScriptedReviewModel {
    script: Mutex<ReviewScript>,
}

impl Default for ScriptedReviewModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedReviewModel {
    /// Every item gets label `A`; generation proposes two items.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(ReviewScript {
                default_label: "A".to_string(),
                ..ReviewScript::default()
            }),
        }
    }

    pub fn with_checklist(self, items: Vec<&str>) -> Self {
        lock(&self.script).checklist = Some(Ok(items.into_iter().map(String::from).collect()));
        self
    }

    pub fn with_checklist_error(self, message: &str) -> Self {
        lock(&self.script).checklist = Some(Err(message.to_string()));
        self
    }

    /// Parts whose text contains `needle` get `label`.
    pub fn with_label_for_text(self, needle: &str, label: &str) -> Self {
        lock(&self.script)
            .labels_for_text
            .push((needle.to_string(), label.to_string()));
        self
    }

    /// Parts longer than `chars` characters overflow the context.
    pub fn with_overflow_above(self, chars: usize) -> Self {
        lock(&self.script).overflow_above = Some(chars);
        self
    }

    /// Calls whose chunk contains any of `items` fail with `message`.
    pub fn fail_items(&self, items: &[Uuid], message: &str) {
        let mut script = lock(&self.script);
        script.failing_items.extend(items.iter().copied());
        script.failure_message = message.to_string();
    }

    pub fn set_default_label(&self, label: &str) {
        lock(&self.script).default_label = label.to_string();
    }

    pub fn last_requirements(&self) -> Option<String> {
        lock(&self.script).last_requirements.clone()
    }

    /// Item count of every distinct chunk, in first-call order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        lock(&self.script).chunk_sizes.clone()
    }

    /// Distinct part counts seen, in first-call order.
    pub fn part_counts_seen(&self) -> Vec<usize> {
        lock(&self.script).part_counts.clone()
    }
}

#[async_trait]
impl ReviewModel for ScriptedReviewModel {
    async fn generate_checklist(
        &self,
        _documents: &[DocumentPart],
        requirements: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut script = lock(&self.script);
        script.last_requirements = requirements.map(String::from);
        match &script.checklist {
            Some(Ok(items)) => Ok(items.clone()),
            Some(Err(message)) => Err(Error::Inference(message.clone())),
            None => Ok(vec!["Generated item 1".into(), "Generated item 2".into()]),
        }
    }

    async fn review_chunk(
        &self,
        items: &[ChecklistPrompt],
        document: &DocumentPart,
    ) -> Result<Vec<ItemVerdict>> {
        let mut script = lock(&self.script);

        if !script.part_counts.contains(&document.total_parts) {
            script.part_counts.push(document.total_parts);
        }
        if document.part_index == 0 && document.total_parts == 1 {
            script.chunk_sizes.push(items.len());
        }

        if let Some(limit) = script.overflow_above {
            let chars = document.text.chars().count();
            if chars > limit {
                return Err(Error::ContextOverflow(format!(
                    "{chars} characters exceed {limit}"
                )));
            }
        }
        if items.iter().any(|i| script.failing_items.contains(&i.id)) {
            return Err(Error::Inference(script.failure_message.clone()));
        }

        let label = script
            .labels_for_text
            .iter()
            .find(|(needle, _)| document.text.contains(needle.as_str()))
            .map(|(_, label)| label.clone())
            .unwrap_or_else(|| script.default_label.clone());

        Ok(items
            .iter()
            .map(|item| ItemVerdict {
                checklist_item_id: item.id,
                evaluation: label.clone(),
                comment: format!("{} reviewed in {}", item.content, document.document_name),
            })
            .collect())
    }
}

/// [`QaModel`] streaming fixed deltas, or failing up front.
pub struct ScriptedQaModel {
    deltas: std::result::Result<Vec<String>, String>,
    last_context: Mutex<String>,
}

impl ScriptedQaModel {
    pub fn new(deltas: Vec<&str>) -> Self {
        Self {
            deltas: Ok(deltas.into_iter().map(String::from).collect()),
            last_context: Mutex::new(String::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            deltas: Err(message.to_string()),
            last_context: Mutex::new(String::new()),
        }
    }

    pub fn last_context(&self) -> String {
        lock(&self.last_context).clone()
    }
}

#[async_trait]
impl QaModel for ScriptedQaModel {
    async fn answer(
        &self,
        _question: &str,
        context: &str,
    ) -> Result<BoxStream<'static, Result<String>>> {
        *lock(&self.last_context) = context.to_string();
        match &self.deltas {
            Ok(deltas) => Ok(stream::iter(deltas.clone().into_iter().map(Ok)).boxed()),
            Err(message) => Err(Error::Inference(message.clone())),
        }
    }
}
