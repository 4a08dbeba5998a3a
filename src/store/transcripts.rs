//! Transcript Store (spec §3 "Transcript", §6 "document_transcripts").
//!
//! One row per document, written once after the transcript builder (C7)
//! runs; read back by the mapping resolver's keyword-search strategy (C8).

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::Transcript;
use crate::store::pool::DbPool;

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn upsert(&self, job_id: Uuid, transcript: &Transcript) -> Result<(), EngineError>;

    async fn get(&self, document_id: Uuid) -> Result<Option<Transcript>, EngineError>;
}

pub struct PostgresTranscriptStore {
    pool: DbPool,
}

impl PostgresTranscriptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TranscriptStore for PostgresTranscriptStore {
    async fn upsert(&self, job_id: Uuid, transcript: &Transcript) -> Result<(), EngineError> {
        let section_index =
            serde_json::to_value(&transcript.section_index).map_err(|e| EngineError::Internal(e.to_string()))?;
        let field_locations =
            serde_json::to_value(&transcript.field_locations).map_err(|e| EngineError::Internal(e.to_string()))?;

        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        client
            .execute(
                "INSERT INTO document_transcripts \
                    (document_id, job_id, full_transcript, page_transcripts, section_index, field_locations, \
                     total_pages, total_sections, generation_time_ms) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (document_id) DO UPDATE SET \
                    full_transcript = excluded.full_transcript, \
                    page_transcripts = excluded.page_transcripts, \
                    section_index = excluded.section_index, \
                    field_locations = excluded.field_locations, \
                    total_pages = excluded.total_pages, \
                    total_sections = excluded.total_sections, \
                    generation_time_ms = excluded.generation_time_ms",
                &[
                    &transcript.document_id,
                    &job_id,
                    &transcript.full_transcript,
                    &transcript.page_transcripts,
                    &section_index,
                    &field_locations,
                    &(transcript.total_pages as i32),
                    &(transcript.total_sections as i32),
                    &(transcript.generation_time_ms as i64),
                ],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<Transcript>, EngineError> {
        let client = self.pool.get().await.map_err(|e| EngineError::PoolError(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT document_id, job_id, full_transcript, page_transcripts, section_index, field_locations, \
                        total_pages, total_sections, generation_time_ms \
                 FROM document_transcripts WHERE document_id = $1",
                &[&document_id],
            )
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let section_index_json: serde_json::Value = row.get("section_index");
        let field_locations_json: serde_json::Value = row.get("field_locations");

        Ok(Some(Transcript {
            document_id: row.get("document_id"),
            job_id: row.get("job_id"),
            full_transcript: row.get("full_transcript"),
            page_transcripts: row.get("page_transcripts"),
            section_index: serde_json::from_value(section_index_json).map_err(|e| EngineError::Internal(e.to_string()))?,
            field_locations: serde_json::from_value(field_locations_json).map_err(|e| EngineError::Internal(e.to_string()))?,
            total_pages: row.get::<_, i32>("total_pages") as usize,
            total_sections: row.get::<_, i32>("total_sections") as usize,
            generation_time_ms: row.get::<_, i64>("generation_time_ms") as u64,
        }))
    }
}
