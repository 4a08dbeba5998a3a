//! Document Store (spec §3 "Document", §6 "documents(...)").
//!
//! Owns the `documents` row's lifecycle: created on ingest, mutated only by
//! the pipeline run processing it, terminal at `completed`/`failed`/
//! `needs_review` (spec §3 "Lifecycle").

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{Document, DocumentStatus, Timings};
use crate::store::pool::DbPool;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(&self, document: &Document) -> Result<(), EngineError>;

    async fn set_status(&self, document_id: Uuid, status: DocumentStatus) -> Result<(), EngineError>;

    async fn set_status_with_error(
        &self,
        document_id: Uuid,
        status: DocumentStatus,
        error_message: &str,
        error_type: &str,
    ) -> Result<(), EngineError>;

    async fn set_pages_processed(&self, document_id: Uuid, pages_processed: usize, pages_total: usize) -> Result<(), EngineError>;

    async fn set_timings(&self, document_id: Uuid, timings: &Timings) -> Result<(), EngineError>;

    async fn get(&self, document_id: Uuid) -> Result<Option<Document>, EngineError>;

    /// Every document belonging to a job whose status is `completed`, or
    /// which already carries extracted fields (spec §4.9 step 1: export
    /// target resolution when no explicit `document_ids` list is given).
    async fn documents_for_export(&self, job_id: Uuid) -> Result<Vec<Uuid>, EngineError>;
}

pub struct PostgresDocumentStore {
    pool: DbPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Processing => "processing",
        DocumentStatus::Completed => "completed",
        DocumentStatus::NeedsReview => "needs_review",
        DocumentStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> DocumentStatus {
    match s {
        "processing" => DocumentStatus::Processing,
        "completed" => DocumentStatus::Completed,
        "needs_review" => DocumentStatus::NeedsReview,
        "failed" => DocumentStatus::Failed,
        _ => DocumentStatus::Pending,
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn create(&self, document: &Document) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        client
            .execute(
                "INSERT INTO documents \
                    (id, job_id, filename, mime_type, byte_size, status, pages_total, pages_processed, \
                     fields_extracted, tokens_used, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &document.id,
                    &document.job_id,
                    &document.filename,
                    &document.mime_type,
                    &(document.byte_size as i64),
                    &status_str(document.status),
                    &(document.pages_total as i32),
                    &(document.pages_processed as i32),
                    &(document.fields_extracted as i64),
                    &(document.tokens_used as i64),
                    &document.created_at,
                ],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn set_status(&self, document_id: Uuid, status: DocumentStatus) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        client
            .execute(
                "UPDATE documents SET status = $2 WHERE id = $1",
                &[&document_id, &status_str(status)],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn set_status_with_error(
        &self,
        document_id: Uuid,
        status: DocumentStatus,
        error_message: &str,
        error_type: &str,
    ) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        client
            .execute(
                "UPDATE documents SET status = $2, error_message = $3, error_type = $4 WHERE id = $1",
                &[&document_id, &status_str(status), &error_message, &error_type],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn set_pages_processed(&self, document_id: Uuid, pages_processed: usize, pages_total: usize) -> Result<(), EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        client
            .execute(
                "UPDATE documents SET pages_processed = $2, pages_total = $3 WHERE id = $1",
                &[&document_id, &(pages_processed as i32), &(pages_total as i32)],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn set_timings(&self, document_id: Uuid, timings: &Timings) -> Result<(), EngineError> {
        let payload = serde_json::to_value(timings).map_err(|e| EngineError::Internal(e.to_string()))?;
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        client
            .execute("UPDATE documents SET timings = $2 WHERE id = $1", &[&document_id, &payload])
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<Document>, EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT id, job_id, filename, mime_type, byte_size, status, pages_total, pages_processed, \
                        fields_extracted, tokens_used, average_confidence, fields_needing_review, \
                        error_message, error_type, created_at, processing_completed_at \
                 FROM documents WHERE id = $1",
                &[&document_id],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(row.map(|row| Document {
            id: row.get("id"),
            job_id: row.get("job_id"),
            filename: row.get("filename"),
            mime_type: row.get("mime_type"),
            byte_size: row.get::<_, i64>("byte_size") as u64,
            status: status_from_str(row.get("status")),
            pages_total: row.get::<_, i32>("pages_total") as usize,
            pages_processed: row.get::<_, i32>("pages_processed") as usize,
            fields_extracted: row.get::<_, i64>("fields_extracted") as usize,
            tokens_used: row.get::<_, i64>("tokens_used") as u64,
            timings: Timings::default(),
            error_message: row.get("error_message"),
            error_type: row.get("error_type"),
            average_confidence: row.get("average_confidence"),
            fields_needing_review: row.get::<_, i32>("fields_needing_review") as usize,
            created_at: row.get("created_at"),
            processing_completed_at: row.get("processing_completed_at"),
        }))
    }

    async fn documents_for_export(&self, job_id: Uuid) -> Result<Vec<Uuid>, EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        let rows = client
            .query(
                "SELECT id FROM documents WHERE job_id = $1 AND (status = 'completed' OR fields_extracted > 0)",
                &[&job_id],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::NeedsReview,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status_from_str(status_str(status)), status);
        }
    }

    #[test]
    fn unknown_status_string_defaults_to_pending() {
        assert_eq!(status_from_str("bogus"), DocumentStatus::Pending);
    }
}
