//! File metadata repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use reviewq_core::{Error, FileMetadata, FileMetadataRepository, NewFileMetadata, Result};

const FILE_COLUMNS: &str =
    "id, task_id, original_name, mime_hint, size_bytes, process_mode, converted_image_count";

/// PostgreSQL implementation of FileMetadataRepository.
#[derive(Clone)]
pub struct PgFileMetadataRepository {
    pool: Pool<Postgres>,
}

impl PgFileMetadataRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_file_row(row: PgRow) -> Result<FileMetadata> {
    let process_mode: String = row.get("process_mode");
    Ok(FileMetadata {
        id: row.get("id"),
        task_id: row.get("task_id"),
        original_name: row.get("original_name"),
        mime_hint: row.get("mime_hint"),
        size_bytes: row.get("size_bytes"),
        process_mode: process_mode.parse()?,
        converted_image_count: row.get("converted_image_count"),
    })
}

/// Insert file rows for a task inside the caller's transaction.
pub(crate) async fn insert_files_tx(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
    files: Vec<NewFileMetadata>,
) -> Result<Vec<FileMetadata>> {
    let mut inserted = Vec::with_capacity(files.len());
    for file in files {
        let row = sqlx::query(&format!(
            "INSERT INTO task_file (id, task_id, original_name, mime_hint, size_bytes,
                                    process_mode, converted_image_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(file.id)
        .bind(task_id)
        .bind(&file.original_name)
        .bind(&file.mime_hint)
        .bind(file.size_bytes)
        .bind(file.process_mode.as_str())
        .bind(file.converted_image_count)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;
        inserted.push(parse_file_row(row)?);
    }
    Ok(inserted)
}

/// List a task's files inside the caller's transaction.
pub(crate) async fn list_files_tx(
    tx: &mut Transaction<'_, Postgres>,
    task_id: Uuid,
) -> Result<Vec<FileMetadata>> {
    let rows = sqlx::query(&format!(
        "SELECT {FILE_COLUMNS} FROM task_file WHERE task_id = $1 ORDER BY created_at, id"
    ))
    .bind(task_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(Error::Database)?;
    rows.into_iter().map(parse_file_row).collect()
}

#[async_trait]
impl FileMetadataRepository for PgFileMetadataRepository {
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<FileMetadata>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM task_file WHERE task_id = $1 ORDER BY created_at, id"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(parse_file_row).collect()
    }

    async fn delete_for_task(&self, task_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_file WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn set_converted_image_count(&self, file_id: Uuid, count: i32) -> Result<()> {
        let result = sqlx::query("UPDATE task_file SET converted_image_count = $1 WHERE id = $2")
            .bind(count)
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("file {file_id}")));
        }
        Ok(())
    }
}
