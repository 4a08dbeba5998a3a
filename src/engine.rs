//! Ingest entry point (spec §6 `process_document`).
//!
//! Not present in the teacher, which has no persistence layer to wire up —
//! `convert()` there goes straight from PDF bytes to a Markdown string.
//! Composes the page pipeline (C5), flattener/bulk loader (C6), and
//! transcript builder (C7) into the single call a source adapter's worker
//! loop makes per discovered document, grounded in
//! `original_source/.../document_processor.py`'s top-level `process_document`
//! orchestration (render → extract → flatten → persist → transcript).

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::{EngineConfig, ExtractionTask};
use crate::error::EngineError;
use crate::flatten::flatten_document;
use crate::model::{DocumentStatus, Timings};
use crate::pipeline::{PageOutcome, PagePipeline};
use crate::store::{DocumentStore, FieldsStore, TranscriptStore};
use crate::transcript::build_transcript;

/// Outcome of one `process_document` call (spec §6: "returns status, pages
/// processed/failed, fields extracted, tokens used, processing time").
#[derive(Debug, Clone)]
pub struct ProcessDocumentOutcome {
    pub document_id: Uuid,
    pub status: DocumentStatus,
    pub pages_total: usize,
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub fields_extracted: usize,
    pub tokens_used: u64,
    pub processing_time_s: f64,
}

fn extraction_method_label(task: ExtractionTask) -> &'static str {
    match task {
        ExtractionTask::FieldDetection => "field_detection",
        ExtractionTask::FormCreation => "form_creation",
        ExtractionTask::TemplateMatching => "template_matching",
        ExtractionTask::DbTemplateMatching => "db_template_matching",
        ExtractionTask::WithoutTemplateExtraction => "without_template_extraction",
        ExtractionTask::TemplateGuidedExtraction => "template_guided_extraction",
        ExtractionTask::BankStatementExtraction => "bank_statement_extraction",
    }
}

/// Three-way rollup over per-page outcomes (spec §7 "Document status
/// rollup"): every page succeeded → `Completed`; some but not all failed →
/// `NeedsReview`; every page failed → `Failed`.
fn rollup_status(outcomes: &[PageOutcome]) -> (DocumentStatus, usize, usize) {
    let pages_failed = outcomes.iter().filter(|o| o.result.error.is_some()).count();
    let pages_processed = outcomes.len() - pages_failed;

    let status = if outcomes.is_empty() || pages_failed == 0 {
        DocumentStatus::Completed
    } else if pages_failed == outcomes.len() {
        DocumentStatus::Failed
    } else {
        DocumentStatus::NeedsReview
    };
    (status, pages_processed, pages_failed)
}

fn first_error_detail(outcomes: &[PageOutcome]) -> Option<String> {
    outcomes.iter().find_map(|o| o.result.error.as_ref().map(|e| e.to_string()))
}

/// Owns the pipeline and the three persistence stores a document's journey
/// touches. One `Engine` is shared (via `Arc`) across every document a
/// worker loop processes.
pub struct Engine {
    config: EngineConfig,
    pipeline: PagePipeline,
    fields_store: Arc<dyn FieldsStore>,
    document_store: Arc<dyn DocumentStore>,
    transcript_store: Arc<dyn TranscriptStore>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        fields_store: Arc<dyn FieldsStore>,
        document_store: Arc<dyn DocumentStore>,
        transcript_store: Arc<dyn TranscriptStore>,
    ) -> Self {
        let pipeline = PagePipeline::new(&config);
        Self { config, pipeline, fields_store, document_store, transcript_store }
    }

    /// Build an `Engine` around a caller-supplied pipeline (detectors and/or
    /// a progress callback already wired in) rather than the plain one
    /// [`Self::new`] builds, while still using `config` for task/document
    /// type and model-version bookkeeping.
    pub fn with_pipeline(
        config: EngineConfig,
        pipeline: PagePipeline,
        fields_store: Arc<dyn FieldsStore>,
        document_store: Arc<dyn DocumentStore>,
        transcript_store: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self { config, pipeline, fields_store, document_store, transcript_store }
    }

    /// Run one document end to end: resolve its page count, drive every
    /// page through the pipeline, flatten and bulk-persist its fields, build
    /// and persist its transcript, and roll its status up (spec §6, §7).
    pub async fn process_document(
        &self,
        document_id: Uuid,
        job_id: Uuid,
        pdf_bytes: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<ProcessDocumentOutcome, EngineError> {
        let started = Instant::now();
        self.document_store.set_status(document_id, DocumentStatus::Processing).await?;

        let pdf_bytes = Arc::new(pdf_bytes);
        let total_pages = self.pipeline.pdf_resolver().page_count(pdf_bytes.clone(), None).await?;

        info!(document_id = %document_id, total_pages, "starting document processing");

        let outcomes = self
            .pipeline
            .run_document(
                document_id,
                pdf_bytes,
                total_pages,
                self.config.extraction_task,
                self.config.document_type.as_deref(),
                cancel,
            )
            .await;

        let (status, pages_processed, pages_failed) = rollup_status(&outcomes);

        let pages: Vec<_> = outcomes.iter().map(|o| o.result.clone()).collect();
        let model_version = self.config.llm.model.clone().unwrap_or_else(|| "unknown".to_string());
        let extraction_method = extraction_method_label(self.config.extraction_task);
        let fields = flatten_document(&pages, job_id, &model_version, extraction_method);
        let fields_extracted = fields.len();
        let tokens_used: u64 = pages.iter().map(|p| p.token_usage.total()).sum();

        if !fields.is_empty() {
            self.fields_store.bulk_insert_fields(&fields).await?;
        }

        match status {
            DocumentStatus::Failed => {
                let detail = first_error_detail(&outcomes).unwrap_or_else(|| "all pages failed".to_string());
                warn!(document_id = %document_id, %detail, "document failed: every page errored");
                self.document_store
                    .set_status_with_error(document_id, status, &detail, "AllPagesFailed")
                    .await?;
            }
            _ => {
                self.document_store.set_status(document_id, status).await?;
            }
        }
        self.document_store.set_pages_processed(document_id, pages_processed, total_pages).await?;

        let transcript = build_transcript(document_id, job_id, &pages);
        self.transcript_store.upsert(job_id, &transcript).await?;

        let elapsed = started.elapsed();
        self.document_store
            .set_timings(document_id, &Timings { llm_ms: elapsed.as_millis() as u64, ..Timings::default() })
            .await?;

        info!(
            document_id = %document_id,
            ?status,
            pages_processed,
            pages_failed,
            fields_extracted,
            tokens_used,
            "finished document processing"
        );

        Ok(ProcessDocumentOutcome {
            document_id,
            status,
            pages_total: total_pages,
            pages_processed,
            pages_failed,
            fields_extracted,
            tokens_used,
            processing_time_s: elapsed.as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::model::{ContentType, HierObject, HierValue, PageResult, TokenUsage};

    fn ok_outcome(page_number: usize) -> PageOutcome {
        let mut obj = HierObject::default();
        obj.insert("name", HierValue::String("ACME".into()));
        PageOutcome {
            result: PageResult {
                document_id: Uuid::nil(),
                page_number,
                content_type: ContentType::Text,
                hierarchical_data: Some(HierValue::Object(obj)),
                signatures: Vec::new(),
                faces: Vec::new(),
                token_usage: TokenUsage { prompt_tokens: 10, completion_tokens: 5, reasoning_tokens: 0, text_tokens: 5 },
                finish_reason: Some("stop".into()),
                duration_ms: 100,
                retries: 0,
                error: None,
            },
            debug_overlay: None,
        }
    }

    fn failed_outcome(page_number: usize) -> PageOutcome {
        PageOutcome {
            result: PageResult {
                document_id: Uuid::nil(),
                page_number,
                content_type: ContentType::Text,
                hierarchical_data: None,
                signatures: Vec::new(),
                faces: Vec::new(),
                token_usage: TokenUsage::default(),
                finish_reason: None,
                duration_ms: 0,
                retries: 1,
                error: Some(StageError::RenderFailed { page: page_number, detail: "bad xref".into() }),
            },
            debug_overlay: None,
        }
    }

    #[test]
    fn rollup_all_success_is_completed() {
        let outcomes = vec![ok_outcome(1), ok_outcome(2)];
        let (status, processed, failed) = rollup_status(&outcomes);
        assert_eq!(status, DocumentStatus::Completed);
        assert_eq!(processed, 2);
        assert_eq!(failed, 0);
    }

    #[test]
    fn rollup_all_failed_is_failed() {
        let outcomes = vec![failed_outcome(1), failed_outcome(2)];
        let (status, processed, failed) = rollup_status(&outcomes);
        assert_eq!(status, DocumentStatus::Failed);
        assert_eq!(processed, 0);
        assert_eq!(failed, 2);
    }

    #[test]
    fn rollup_partial_failure_needs_review() {
        let outcomes = vec![ok_outcome(1), failed_outcome(2)];
        let (status, processed, failed) = rollup_status(&outcomes);
        assert_eq!(status, DocumentStatus::NeedsReview);
        assert_eq!(processed, 1);
        assert_eq!(failed, 1);
    }

    #[test]
    fn rollup_empty_document_is_completed() {
        let (status, processed, failed) = rollup_status(&[]);
        assert_eq!(status, DocumentStatus::Completed);
        assert_eq!(processed, 0);
        assert_eq!(failed, 0);
    }

    #[test]
    fn extraction_method_labels_cover_every_task() {
        assert_eq!(extraction_method_label(ExtractionTask::BankStatementExtraction), "bank_statement_extraction");
        assert_eq!(extraction_method_label(ExtractionTask::WithoutTemplateExtraction), "without_template_extraction");
    }
}
