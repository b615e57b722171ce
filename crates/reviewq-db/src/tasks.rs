//! Task repository implementation.
//!
//! Dequeue locks one queued row per call with `FOR UPDATE SKIP LOCKED`, so N
//! concurrent pollers against the same credential receive N distinct rows (or
//! nothing) without blocking on each other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

use reviewq_core::{
    CancelOutcome, CredentialHash, Error, NewTask, QueueStats, Result, Task,
    TaskRepository, TaskStatus, TaskType,
};

use crate::file_metadata::{insert_files_tx, list_files_tx};

/// Unique partial index admitting one active task per (type, target).
const ACTIVE_TARGET_INDEX: &str = "uq_task_queue_active_target";

const TASK_COLUMNS: &str = "id, task_type, status, credential_hash, priority, target_id, user_id,
                            payload, error_message, created_at, started_at, completed_at";

/// PostgreSQL implementation of TaskRepository.
#[derive(Clone)]
pub struct PgTaskRepository {
    pool: Pool<Postgres>,
    /// Wakes idle worker loops when a task is created.
    notify: Arc<Notify>,
}

impl PgTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Handle signalled on every successful create.
    pub fn task_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_task_row(row: PgRow) -> Result<Task> {
        let task_type: String = row.get("task_type");
        let status: String = row.get("status");
        let credential_hash: String = row.get("credential_hash");
        Ok(Task {
            id: row.get("id"),
            task_type: task_type.parse()?,
            status: status.parse()?,
            credential_hash: CredentialHash::from_hashed(credential_hash),
            priority: row.get("priority"),
            target_id: row.get("target_id"),
            user_id: row.get("user_id"),
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Map a losing insert against the active-target index to a conflict.
    fn insert_error(e: sqlx::Error, task: &NewTask) -> Error {
        match &e {
            sqlx::Error::Database(db_err)
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(ACTIVE_TARGET_INDEX) =>
            {
                Error::Conflict(format!(
                    "{} task is already active for target {}",
                    task.task_type, task.target_id
                ))
            }
            _ => Error::Database(e),
        }
    }

    /// Explain why a guarded terminal update changed nothing.
    async fn transition_error(&self, task_id: Uuid, to: TaskStatus) -> Error {
        match self.get(task_id).await {
            Ok(Some(task)) => Error::InvalidTransition {
                from: task.status,
                to,
            },
            Ok(None) => Error::TaskNotFound(task_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn create(&self, task: NewTask) -> Result<Task> {
        let task_id = task.id;
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "INSERT INTO task_queue (id, task_type, status, credential_hash, priority, target_id,
                                     user_id, payload, created_at)
             VALUES ($1, $2, 'queued', $3, $4, $5, $6, $7, $8)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(task.task_type.as_str())
        .bind(task.credential_hash.as_str())
        .bind(task.priority)
        .bind(task.target_id)
        .bind(&task.user_id)
        .bind(&task.payload)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Self::insert_error(e, &task))?;

        let file_count = task.files.len();
        insert_files_tx(&mut tx, task_id, task.files).await?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "tasks",
            op = "create",
            task_id = %task_id,
            task_type = %task.task_type,
            credential_hash = task.credential_hash.short(),
            file_count,
            "Task created"
        );

        self.notify.notify_waiters();
        Self::parse_task_row(row)
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM task_queue WHERE id = $1"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_task_row).transpose()
    }

    async fn queued_count(&self, credential_hash: &CredentialHash) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM task_queue WHERE credential_hash = $1 AND status = 'queued'",
        )
        .bind(credential_hash.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count)
    }

    async fn distinct_queued_credentials(&self) -> Result<Vec<CredentialHash>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            "SELECT credential_hash FROM task_queue
             WHERE status = 'queued'
             GROUP BY credential_hash
             ORDER BY MIN(created_at) ASC, credential_hash ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(hashes.into_iter().map(CredentialHash::from_hashed).collect())
    }

    async fn dequeue_next(&self, credential_hash: &CredentialHash) -> Result<Option<Task>> {
        let now = Utc::now();

        // Lock, flip and release in one transaction so no other poller can
        // observe the row between the status change and the lock release.
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let locked: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM task_queue
             WHERE status = 'queued' AND credential_hash = $1
             ORDER BY priority DESC, created_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(credential_hash.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some(task_id) = locked else {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "UPDATE task_queue
             SET status = 'processing', started_at = $2
             WHERE id = $1
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        trace!(
            subsystem = "db",
            component = "tasks",
            op = "dequeue",
            task_id = %task_id,
            credential_hash = credential_hash.short(),
            "Task dequeued"
        );

        Self::parse_task_row(row).map(Some)
    }

    async fn complete(&self, task_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE task_queue
             SET status = 'completed', completed_at = $2, error_message = NULL
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(task_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(task_id, TaskStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE task_queue
             SET status = 'failed', completed_at = $2, error_message = $3
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(task_id)
        .bind(Utc::now())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(task_id, TaskStatus::Failed).await);
        }
        Ok(())
    }

    async fn cancel_queued(&self, task_id: Uuid) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock makes a concurrent dequeue skip this task while we decide.
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_queue WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(CancelOutcome::NotFound);
        };
        let task = Self::parse_task_row(row)?;

        if task.status != TaskStatus::Queued {
            tx.commit().await.map_err(Error::Database)?;
            return Ok(CancelOutcome::NotQueued(task));
        }

        let files = list_files_tx(&mut tx, task_id).await?;

        sqlx::query("DELETE FROM task_file WHERE task_id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query("DELETE FROM task_queue WHERE id = $1 AND status = 'queued'")
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        Ok(CancelOutcome::Cancelled { task, files })
    }

    async fn find_active(&self, task_type: TaskType, target_id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_queue
             WHERE task_type = $1 AND target_id = $2 AND status IN ('queued', 'processing')
             ORDER BY created_at ASC
             LIMIT 1"
        ))
        .bind(task_type.as_str())
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_task_row).transpose()
    }

    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_queue
             WHERE status = $1
             ORDER BY created_at ASC
             LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_task_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
             FROM task_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            queued: row.get::<i64, _>("queued"),
            processing: row.get::<i64, _>("processing"),
            completed: row.get::<i64, _>("completed"),
            failed: row.get::<i64, _>("failed"),
        })
    }

    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM task_queue
             WHERE status IN ('completed', 'failed') AND completed_at < $1
             RETURNING id",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(ids)
    }
}
