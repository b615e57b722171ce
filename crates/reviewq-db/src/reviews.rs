//! Review aggregate repository: spaces, checklists, targets, results and
//! document snapshots.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use reviewq_core::{
    new_v7, ChecklistItem, DocumentSnapshot, Error, FileMetadata, NewReviewResult, Result,
    ReviewChecklistItem, ReviewRepository, ReviewResult, ReviewTarget, ReviewTargetStatus, Space,
};

const TARGET_COLUMNS: &str = "id, space_id, name, status, error_message, updated_at";
const RESULT_COLUMNS: &str =
    "id, review_target_id, checklist_item_id, evaluation, comment, error_message, updated_at";
const DOCUMENT_COLUMNS: &str =
    "id, review_target_id, original_name, mime_hint, process_mode, extracted_text, created_at";

/// PostgreSQL implementation of ReviewRepository.
#[derive(Clone)]
pub struct PgReviewRepository {
    pool: Pool<Postgres>,
}

impl PgReviewRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_space_row(row: PgRow) -> Space {
        Space {
            id: row.get("id"),
            name: row.get("name"),
            checklist_generation_error: row.get("checklist_generation_error"),
        }
    }

    fn parse_item_row(row: PgRow) -> ChecklistItem {
        ChecklistItem {
            id: row.get("id"),
            space_id: row.get("space_id"),
            content: row.get("content"),
            ordinal: row.get("ordinal"),
        }
    }

    fn parse_target_row(row: PgRow) -> Result<ReviewTarget> {
        let status: String = row.get("status");
        Ok(ReviewTarget {
            id: row.get("id"),
            space_id: row.get("space_id"),
            name: row.get("name"),
            status: status.parse()?,
            error_message: row.get("error_message"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_snapshot_item_row(row: PgRow) -> ReviewChecklistItem {
        ReviewChecklistItem {
            id: row.get("id"),
            review_target_id: row.get("review_target_id"),
            source_item_id: row.get("source_item_id"),
            content: row.get("content"),
            ordinal: row.get("ordinal"),
        }
    }

    fn parse_result_row(row: PgRow) -> ReviewResult {
        ReviewResult {
            id: row.get("id"),
            review_target_id: row.get("review_target_id"),
            checklist_item_id: row.get("checklist_item_id"),
            evaluation: row.get("evaluation"),
            comment: row.get("comment"),
            error_message: row.get("error_message"),
            updated_at: row.get("updated_at"),
        }
    }

    fn parse_document_row(row: PgRow) -> Result<DocumentSnapshot> {
        let process_mode: String = row.get("process_mode");
        Ok(DocumentSnapshot {
            id: row.get("id"),
            review_target_id: row.get("review_target_id"),
            original_name: row.get("original_name"),
            mime_hint: row.get("mime_hint"),
            process_mode: process_mode.parse()?,
            extracted_text: row.get("extracted_text"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ReviewRepository for PgReviewRepository {
    async fn create_space(&self, name: &str) -> Result<Space> {
        let row = sqlx::query(
            "INSERT INTO space (id, name) VALUES ($1, $2)
             RETURNING id, name, checklist_generation_error",
        )
        .bind(new_v7())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_space_row(row))
    }

    async fn get_space(&self, space_id: Uuid) -> Result<Option<Space>> {
        let row = sqlx::query("SELECT id, name, checklist_generation_error FROM space WHERE id = $1")
            .bind(space_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_space_row))
    }

    async fn set_generation_error(&self, space_id: Uuid, error: Option<&str>) -> Result<()> {
        let result = sqlx::query("UPDATE space SET checklist_generation_error = $2 WHERE id = $1")
            .bind(space_id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("space {space_id}")));
        }
        Ok(())
    }

    async fn list_checklist_items(&self, space_id: Uuid) -> Result<Vec<ChecklistItem>> {
        let rows = sqlx::query(
            "SELECT id, space_id, content, ordinal FROM checklist_item
             WHERE space_id = $1
             ORDER BY ordinal, id",
        )
        .bind(space_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_item_row).collect())
    }

    async fn append_checklist_items(
        &self,
        space_id: Uuid,
        contents: &[String],
    ) -> Result<Vec<ChecklistItem>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Serialize appends per space so ordinals stay unique.
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM space WHERE id = $1 FOR UPDATE")
            .bind(space_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("space {space_id}")));
        }

        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM checklist_item WHERE space_id = $1",
        )
        .bind(space_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let mut items = Vec::with_capacity(contents.len());
        for (offset, content) in contents.iter().enumerate() {
            let row = sqlx::query(
                "INSERT INTO checklist_item (id, space_id, content, ordinal)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, space_id, content, ordinal",
            )
            .bind(new_v7())
            .bind(space_id)
            .bind(content)
            .bind(next + offset as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
            items.push(Self::parse_item_row(row));
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(items)
    }

    async fn create_target(&self, space_id: Uuid, name: &str) -> Result<ReviewTarget> {
        let row = sqlx::query(&format!(
            "INSERT INTO review_target (id, space_id, name, status, updated_at)
             VALUES ($1, $2, $3, 'pending', $4)
             RETURNING {TARGET_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(space_id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_target_row(row)
    }

    async fn get_target(&self, target_id: Uuid) -> Result<Option<ReviewTarget>> {
        let row = sqlx::query(&format!(
            "SELECT {TARGET_COLUMNS} FROM review_target WHERE id = $1"
        ))
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_target_row).transpose()
    }

    async fn set_target_status(
        &self,
        target_id: Uuid,
        status: ReviewTargetStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE review_target SET status = $2, error_message = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(target_id)
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("review target {target_id}")));
        }
        Ok(())
    }

    async fn list_target_items(&self, target_id: Uuid) -> Result<Vec<ReviewChecklistItem>> {
        let rows = sqlx::query(
            "SELECT id, review_target_id, source_item_id, content, ordinal
             FROM review_checklist_item
             WHERE review_target_id = $1
             ORDER BY ordinal, id",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_snapshot_item_row).collect())
    }

    async fn replace_target_items(
        &self,
        target_id: Uuid,
        items: &[ChecklistItem],
    ) -> Result<Vec<ReviewChecklistItem>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Results and their cache rows cascade with the old snapshot.
        sqlx::query("DELETE FROM review_checklist_item WHERE review_target_id = $1")
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let mut snapshot = Vec::with_capacity(items.len());
        for (ordinal, item) in items.iter().enumerate() {
            let row = sqlx::query(
                "INSERT INTO review_checklist_item (id, review_target_id, source_item_id, content, ordinal)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id, review_target_id, source_item_id, content, ordinal",
            )
            .bind(new_v7())
            .bind(target_id)
            .bind(item.id)
            .bind(&item.content)
            .bind(ordinal as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
            snapshot.push(Self::parse_snapshot_item_row(row));
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(snapshot)
    }

    async fn list_results(&self, target_id: Uuid) -> Result<Vec<ReviewResult>> {
        let rows = sqlx::query(
            "SELECT r.id, r.review_target_id, r.checklist_item_id, r.evaluation, r.comment,
                    r.error_message, r.updated_at
             FROM review_result r
             JOIN review_checklist_item i ON i.id = r.checklist_item_id
             WHERE r.review_target_id = $1
             ORDER BY i.ordinal, i.id",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_result_row).collect())
    }

    async fn upsert_results(
        &self,
        target_id: Uuid,
        results: Vec<NewReviewResult>,
    ) -> Result<Vec<ReviewResult>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut saved = Vec::with_capacity(results.len());
        for result in results {
            let row = sqlx::query(&format!(
                "INSERT INTO review_result (id, review_target_id, checklist_item_id, evaluation,
                                            comment, error_message, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (review_target_id, checklist_item_id) DO UPDATE
                 SET evaluation = EXCLUDED.evaluation,
                     comment = EXCLUDED.comment,
                     error_message = EXCLUDED.error_message,
                     updated_at = EXCLUDED.updated_at
                 RETURNING {RESULT_COLUMNS}"
            ))
            .bind(new_v7())
            .bind(target_id)
            .bind(result.checklist_item_id)
            .bind(&result.evaluation)
            .bind(&result.comment)
            .bind(&result.error_message)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
            saved.push(Self::parse_result_row(row));
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(saved)
    }

    async fn list_documents(&self, target_id: Uuid) -> Result<Vec<DocumentSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document_snapshot
             WHERE review_target_id = $1
             ORDER BY created_at, id"
        ))
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_document_row).collect()
    }

    async fn get_documents(&self, document_ids: &[Uuid]) -> Result<Vec<DocumentSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document_snapshot
             WHERE id = ANY($1)
             ORDER BY created_at, id"
        ))
        .bind(document_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_document_row).collect()
    }

    async fn save_document(
        &self,
        target_id: Uuid,
        file: &FileMetadata,
        extracted_text: &str,
    ) -> Result<DocumentSnapshot> {
        let row = sqlx::query(&format!(
            "INSERT INTO document_snapshot (id, review_target_id, original_name, mime_hint,
                                            process_mode, extracted_text, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(target_id)
        .bind(&file.original_name)
        .bind(&file.mime_hint)
        .bind(file.process_mode.as_str())
        .bind(extracted_text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::parse_document_row(row)
    }
}
