//! # reviewq-jobs
//!
//! Task queue services and the worker pool for reviewq.
//!
//! This crate provides:
//! - Admission and enqueue of checklist generation and review tasks
//! - A fairness gate that rotates across credentials
//! - Serial worker loops with slow-task reporting and a retention sweeper
//! - Review execution with checklist chunking and document splitting
//! - Retry of failed or all items, and Q&A over cached review evidence
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reviewq_jobs::{
//!     InMemoryEventBroker, QueueConfig, ReviewHandler, Stores, TaskQueue, WorkerBuilder,
//!     WorkerConfig,
//! };
//!
//! let stores = Stores::from_database(&db, uploads);
//! let broker = Arc::new(InMemoryEventBroker::new());
//! let queue = Arc::new(TaskQueue::new(stores.clone(), broker.clone(), QueueConfig::from_env()));
//!
//! let pool = WorkerBuilder::new(stores.clone(), broker.clone(), queue.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(ReviewHandler::new(stores, broker, extractor, model, review_config))
//!     .build()
//!     .await;
//!
//! let handle = pool.start();
//! // ...
//! handle.shutdown_and_wait().await?;
//! ```

pub mod config;
pub mod extract;
pub mod gate;
pub mod handler;
pub mod handlers;
pub mod queue;
pub mod result_cache;
pub mod retry;
pub mod stores;
pub mod worker;

// Always compiled so integration tests (in tests/) can share them.
pub mod testing;

// Re-export core types
pub use reviewq_core::*;

pub use config::{GateConfig, QueueConfig, ReviewConfig};
pub use extract::PlainTextExtractor;
pub use gate::{ConcurrencyGate, GatePermit};
pub use handler::{NoOpHandler, TaskContext, TaskHandler, TaskResult};
pub use handlers::{merge_labels, ChecklistGenerationHandler, ReviewHandler, ReviewSummary};
pub use queue::{TaskQueue, UploadedFile};
pub use result_cache::{
    aggregate_comment, group_evidence, qa_channel, QaRequest, QaRunner, QaSession, ResultCache,
};
pub use retry::RetryCoordinator;
pub use stores::Stores;
pub use worker::{WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle, WorkerPool};
