use std::sync::Arc;
use std::time::Duration;

use reviewq_core::{defaults, EventBroker, QaModel};
use reviewq_jobs::{QaRunner, RetryCoordinator, ReviewConfig, Stores, TaskQueue};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub queue: Arc<TaskQueue>,
    pub retry: Arc<RetryCoordinator>,
    pub qa: QaRunner,
    pub broker: Arc<dyn EventBroker>,
    pub keepalive: Duration,
}

impl AppState {
    pub fn new(
        stores: Stores,
        broker: Arc<dyn EventBroker>,
        queue: Arc<TaskQueue>,
        qa_model: Arc<dyn QaModel>,
        review: ReviewConfig,
    ) -> Self {
        Self {
            retry: Arc::new(RetryCoordinator::new(stores.clone(), queue.clone(), review)),
            qa: QaRunner::new(stores.clone(), broker.clone(), qa_model),
            stores,
            queue,
            broker,
            keepalive: Duration::from_secs(defaults::PUSH_KEEPALIVE_SECS),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }
}
