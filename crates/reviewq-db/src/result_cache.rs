//! Result cache repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use reviewq_core::{
    new_v7, CachedComment, Error, NewResultCacheEntry, Result, ResultCacheEntry,
    ResultCacheRepository,
};

const CACHE_COLUMNS: &str = "id, document_snapshot_id, result_id, comment, total_chunks, chunk_index,
                             per_chunk_label, created_at";

/// PostgreSQL implementation of ResultCacheRepository.
#[derive(Clone)]
pub struct PgResultCacheRepository {
    pool: Pool<Postgres>,
}

impl PgResultCacheRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_entry_row(row: PgRow) -> ResultCacheEntry {
        ResultCacheEntry {
            id: row.get("id"),
            document_snapshot_id: row.get("document_snapshot_id"),
            result_id: row.get("result_id"),
            comment: row.get("comment"),
            total_chunks: row.get("total_chunks"),
            chunk_index: row.get("chunk_index"),
            per_chunk_label: row.get("per_chunk_label"),
            created_at: row.get("created_at"),
        }
    }

    async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry: NewResultCacheEntry,
    ) -> Result<ResultCacheEntry> {
        let row = sqlx::query(&format!(
            "INSERT INTO review_result_cache (id, document_snapshot_id, result_id, comment,
                                              total_chunks, chunk_index, per_chunk_label, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {CACHE_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(entry.document_snapshot_id)
        .bind(entry.result_id)
        .bind(&entry.comment)
        .bind(entry.total_chunks)
        .bind(entry.chunk_index)
        .bind(&entry.per_chunk_label)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE document_snapshot
             SET max_total_chunks = GREATEST(max_total_chunks, $2)
             WHERE id = $1",
        )
        .bind(entry.document_snapshot_id)
        .bind(entry.total_chunks)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_entry_row(row))
    }
}

#[async_trait]
impl ResultCacheRepository for PgResultCacheRepository {
    async fn save(&self, entry: NewResultCacheEntry) -> Result<ResultCacheEntry> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let saved = Self::insert_tx(&mut tx, entry).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(saved)
    }

    async fn save_many(&self, entries: Vec<NewResultCacheEntry>) -> Result<Vec<ResultCacheEntry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut saved = Vec::with_capacity(entries.len());
        for entry in entries {
            saved.push(Self::insert_tx(&mut tx, entry).await?);
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(saved)
    }

    async fn replace_for_results(
        &self,
        result_ids: &[Uuid],
        entries: Vec<NewResultCacheEntry>,
    ) -> Result<Vec<ResultCacheEntry>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM review_result_cache WHERE result_id = ANY($1)")
            .bind(result_ids)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let mut saved = Vec::with_capacity(entries.len());
        for entry in entries {
            saved.push(Self::insert_tx(&mut tx, entry).await?);
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(saved)
    }

    async fn find_comments_for_items(
        &self,
        checklist_item_ids: &[Uuid],
    ) -> Result<Vec<CachedComment>> {
        let rows = sqlx::query(
            "SELECT r.checklist_item_id, c.document_snapshot_id, d.original_name AS document_name,
                    c.chunk_index, c.total_chunks, c.per_chunk_label, c.comment
             FROM review_result_cache c
             JOIN review_result r ON r.id = c.result_id
             JOIN document_snapshot d ON d.id = c.document_snapshot_id
             WHERE r.checklist_item_id = ANY($1)
             ORDER BY r.checklist_item_id, d.created_at, d.id, c.chunk_index",
        )
        .bind(checklist_item_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| CachedComment {
                checklist_item_id: row.get("checklist_item_id"),
                document_snapshot_id: row.get("document_snapshot_id"),
                document_name: row.get("document_name"),
                chunk_index: row.get("chunk_index"),
                total_chunks: row.get("total_chunks"),
                per_chunk_label: row.get("per_chunk_label"),
                comment: row.get("comment"),
            })
            .collect())
    }

    async fn max_total_chunks(&self, document_snapshot_id: Uuid) -> Result<Option<i32>> {
        // Stored on the snapshot so it survives checklist snapshot replacement.
        let max = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT NULLIF(max_total_chunks, 0) FROM document_snapshot WHERE id = $1",
        )
        .bind(document_snapshot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .flatten();

        Ok(max)
    }
}
