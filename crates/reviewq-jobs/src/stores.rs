//! Repository bundle shared by the queue services and the worker pool.

use std::sync::Arc;

use tokio::sync::Notify;

use reviewq_core::{
    FileMetadataRepository, ResultCacheRepository, ReviewRepository, TaskRepository, UploadStore,
};
use reviewq_db::{Database, MemoryStore, MemoryUploadStore, PgPool};

/// Trait-object handles to every store a service needs.
///
/// Services never name a concrete backend; the bundle is built either from a
/// PostgreSQL [`Database`] or from the in-memory store.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskRepository>,
    pub files: Arc<dyn FileMetadataRepository>,
    pub result_cache: Arc<dyn ResultCacheRepository>,
    pub reviews: Arc<dyn ReviewRepository>,
    pub uploads: Arc<dyn UploadStore>,
    /// Signalled by the task repository whenever a task is created.
    pub task_notify: Arc<Notify>,
    /// Connection pool behind the repositories; `None` for the in-memory store.
    pub pool: Option<PgPool>,
}

impl Stores {
    /// Bundle the PostgreSQL repositories with an upload store.
    pub fn from_database(db: &Database, uploads: Arc<dyn UploadStore>) -> Self {
        Self {
            tasks: Arc::new(db.tasks.clone()),
            files: Arc::new(db.files.clone()),
            result_cache: Arc::new(db.result_cache.clone()),
            reviews: Arc::new(db.reviews.clone()),
            uploads,
            task_notify: db.task_notify(),
            pool: Some(db.pool.clone()),
        }
    }

    /// Bundle an in-memory store. Clones of `store` and `uploads` kept by the
    /// caller observe the same state.
    pub fn in_memory(store: MemoryStore, uploads: MemoryUploadStore) -> Self {
        let task_notify = store.task_notify();
        let shared = Arc::new(store);
        Self {
            tasks: shared.clone(),
            files: shared.clone(),
            result_cache: shared.clone(),
            reviews: shared,
            uploads: Arc::new(uploads),
            task_notify,
            pool: None,
        }
    }
}
