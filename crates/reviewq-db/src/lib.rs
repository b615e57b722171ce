//! # reviewq-db
//!
//! Persistence layer for the reviewq task queue.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for tasks, file metadata, the result cache and
//!   the review aggregate
//! - A filesystem upload store
//! - In-memory repositories with the same semantics, for tests and
//!   single-process deployments
//!
//! ## Example
//!
//! ```rust,ignore
//! use reviewq_db::{Database, NewTask, TaskRepository, TaskType};
//!
//! let db = Database::connect("postgres://localhost/reviewq").await?;
//! db.migrate().await?;
//!
//! let task = db.tasks.create(new_task).await?;
//! let next = db.tasks.dequeue_next(&task.credential_hash).await?;
//! ```

pub mod file_metadata;
pub mod file_storage;
pub mod memory;
pub mod pool;
pub mod result_cache;
pub mod reviews;
pub mod tasks;

// Always compiled so integration tests (in tests/) can share them.
pub mod test_fixtures;

pub use reviewq_core::*;

pub use file_metadata::PgFileMetadataRepository;
pub use file_storage::FilesystemUploadStore;
pub use memory::{MemoryStore, MemoryUploadStore};
pub use pool::{create_pool, log_pool_metrics, PoolConfig, PoolHealth};
pub use sqlx::PgPool;
pub use result_cache::PgResultCacheRepository;
pub use reviews::PgReviewRepository;
pub use tasks::PgTaskRepository;

use std::sync::Arc;

use tokio::sync::Notify;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Durable task queue.
    pub tasks: PgTaskRepository,
    /// Files uploaded with tasks.
    pub files: PgFileMetadataRepository,
    /// Per-chunk review output.
    pub result_cache: PgResultCacheRepository,
    /// Spaces, targets, results and document snapshots.
    pub reviews: PgReviewRepository,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self::with_notify(pool, Arc::new(Notify::new()))
    }

    /// Build a database whose task repository signals `notify` on create.
    pub fn with_notify(pool: sqlx::Pool<sqlx::Postgres>, notify: Arc<Notify>) -> Self {
        Self {
            tasks: PgTaskRepository::with_notify(pool.clone(), notify),
            files: PgFileMetadataRepository::new(pool.clone()),
            result_cache: PgResultCacheRepository::new(pool.clone()),
            reviews: PgReviewRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Handle signalled whenever a task is created through this database.
    pub fn task_notify(&self) -> Arc<Notify> {
        self.tasks.task_notify()
    }
}
