//! Core data model: documents, page results, extracted fields, transcripts,
//! and extraction templates (spec §3).
//!
//! These types are the shared vocabulary between every stage of the
//! pipeline and the persistence/export layers. Keeping them in one module
//! (rather than scattering per-stage structs, as the source's duck-typed
//! field dicts did) means every consumer agrees on field names and types.

use crate::error::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle status of a [`Document`].
///
/// `Completed`/`Failed`/`NeedsReview` are terminal; only the pipeline run
/// that owns the document may transition it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    NeedsReview,
    Failed,
}

/// Per-phase wall-clock durations recorded for a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub render_ms: u64,
    pub llm_ms: u64,
    pub detector_ms: u64,
    pub flatten_ms: u64,
    pub persist_ms: u64,
}

/// A document submitted for bulk extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub job_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub status: DocumentStatus,
    pub pages_total: usize,
    pub pages_processed: usize,
    pub fields_extracted: usize,
    pub tokens_used: u64,
    pub timings: Timings,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    /// Simple mean over non-null field confidences (spec §4.6, Open
    /// Question 1: simple mean, not token-weighted).
    pub average_confidence: Option<f32>,
    pub fields_needing_review: usize,
    pub created_at: DateTime<Utc>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(job_id: Uuid, filename: impl Into<String>, mime_type: impl Into<String>, byte_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            filename: filename.into(),
            mime_type: mime_type.into(),
            byte_size,
            status: DocumentStatus::Pending,
            pages_total: 0,
            pages_processed: 0,
            fields_extracted: 0,
            tokens_used: 0,
            timings: Timings::default(),
            error_message: None,
            error_type: None,
            average_confidence: None,
            fields_needing_review: 0,
            created_at: Utc::now(),
            processing_completed_at: None,
        }
    }
}

/// Per-document roll-up applied in the same transaction as the field bulk
/// insert (spec §4.6 "Bulk loader"): `total_fields_extracted`,
/// `average_confidence` (simple mean over non-null confidences),
/// `fields_needing_review`, `total_tokens_used`, and the terminal `status`.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub total_fields_extracted: usize,
    pub average_confidence: Option<f32>,
    pub fields_needing_review: usize,
    pub total_tokens_used: u64,
    pub status: DocumentStatus,
}

impl DocumentSummary {
    /// Compute the summary from a document's already-flattened fields
    /// (spec §8 invariant 10: "bulk transaction atomicity" — the caller is
    /// responsible for discarding this and marking `Failed` if the bulk
    /// insert itself fails).
    pub fn from_fields(fields: &[ExtractedField], status: DocumentStatus) -> Self {
        let confidences: Vec<f32> = fields.iter().filter_map(|f| f.confidence_score).collect();
        let average_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
        };
        Self {
            total_fields_extracted: fields.len(),
            average_confidence,
            fields_needing_review: fields.iter().filter(|f| f.needs_manual_review).count(),
            total_tokens_used: fields.iter().map(|f| f.tokens_used).sum(),
            status,
        }
    }
}

/// Whether a page was presented to the LLM as text or as a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
}

/// Arbitrarily nested tree returned by the LLM, tagged so the flattener (and
/// the typed `_type`/`value` leaf idiom from the source) can walk it without
/// guessing. Preserves key insertion order (object variant is a `Vec` of
/// pairs, not a `HashMap`) so `_keyOrder` semantics fall out naturally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HierValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<HierValue>),
    Object(HierObject),
}

/// An ordered object: `Vec<(key, value)>` rather than `HashMap`, so the
/// flattener walks keys in the order the LLM emitted them (or the order
/// `_keyOrder` specifies), matching the source's insertion-order guarantee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierObject {
    pub entries: Vec<(String, HierValue)>,
}

impl HierObject {
    pub fn get(&self, key: &str) -> Option<&HierValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: HierValue) {
        self.entries.push((key.into(), value));
    }

    /// The typed-leaf idiom: `{"_type": "...", "value": ...}`.
    pub fn as_typed_leaf(&self) -> Option<(&str, &HierValue)> {
        let ty = self.get("_type")?;
        let HierValue::String(ty) = ty else { return None };
        let value = self.get("value")?;
        Some((ty.as_str(), value))
    }
}

/// A single detected region (signature or face) from an object detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub is_hit: bool,
    pub image_base64: String,
}

/// Output of processing one page through the pipeline (spec §3 "Page Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub document_id: Uuid,
    pub page_number: usize,
    pub content_type: ContentType,
    pub hierarchical_data: Option<HierValue>,
    pub signatures: Vec<Detection>,
    pub faces: Vec<Detection>,
    pub token_usage: TokenUsage,
    pub finish_reason: Option<String>,
    pub duration_ms: u64,
    pub retries: u8,
    pub error: Option<StageError>,
}

impl PageResult {
    /// Invariant (spec §3): exactly one of (`hierarchical_data` non-empty,
    /// `error` set) holds.
    pub fn is_consistent(&self) -> bool {
        self.hierarchical_data.is_some() != self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    /// Total completion-side tokens billed by the provider — includes
    /// `text_tokens` *and* `reasoning_tokens` as a superset, mirroring the
    /// OpenAI-style `usage.completion_tokens` field (spec §4.2).
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    /// Completion tokens that actually produced visible output, from the
    /// provider's `completion_tokens_details.text_tokens` breakdown. Unlike
    /// `completion_tokens`, this is zero when a reasoning model consumed its
    /// whole budget on hidden reasoning and emitted nothing (spec §4.2
    /// "Token-limit detection").
    pub text_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A flattened, typed field row (spec §3 "Extracted Field").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedField {
    pub document_id: Uuid,
    pub job_id: Uuid,
    pub field_name: String,
    pub field_label: String,
    pub field_type: FieldType,
    pub field_value: Option<String>,
    pub field_group: String,
    pub page_number: usize,
    pub field_order: u64,
    pub confidence_score: Option<f32>,
    pub needs_manual_review: bool,
    pub extraction_method: String,
    pub model_version: String,
    pub tokens_used: u64,
    pub processing_time_ms: u64,
}

impl ExtractedField {
    pub fn compute_needs_review(confidence: Option<f32>) -> bool {
        matches!(confidence, Some(c) if c < 0.7)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Number,
    Boolean,
    Null,
    Array,
    TableCell,
    Date,
    Currency,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Null => "null",
            FieldType::Array => "array",
            FieldType::TableCell => "table_cell",
            FieldType::Date => "date",
            FieldType::Currency => "currency",
        }
    }
}

/// A searchable page/section/field index built from extracted pages (spec
/// §3 "Transcript", consumed by [`crate::mapping`]'s keyword-search strategy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub document_id: Uuid,
    pub job_id: Uuid,
    pub full_transcript: String,
    pub page_transcripts: Vec<String>,
    pub section_index: BTreeMap<String, SectionRange>,
    pub field_locations: BTreeMap<String, FieldLocation>,
    pub total_pages: usize,
    pub total_sections: usize,
    pub generation_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SectionRange {
    pub first_page: usize,
    pub last_page: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldLocation {
    pub page: usize,
    pub section: String,
}

/// An ordered Excel-column specification driving mapping and export (spec
/// §3 "Extraction Template").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateColumn {
    pub column_number: u32,
    pub excel_column: String,
    pub db_field_path: Option<String>,
    pub source_field: Option<String>,
    pub source_section: Option<String>,
    pub source_page: Option<String>,
    pub search_keywords: Vec<String>,
    pub extraction_hint: Option<String>,
    pub example_value: Option<String>,
    pub data_type: Option<String>,
    pub post_process_type: Option<String>,
    pub post_process_config: Option<serde_json::Value>,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTemplate {
    pub template_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub document_type: Option<String>,
    pub columns: Vec<TemplateColumn>,
    pub usage_count: u64,
}

/// How a template column was resolved for a given document batch (spec §3
/// "Mapping Result", transient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchMethod {
    DbFieldPathDirect,
    DefaultValue,
    KeywordSearch,
    FuzzyMatch,
    AiAssisted,
    Unmapped,
}

/// Sentinel `db_field_name` used when a column resolved to its configured
/// default rather than any extracted field.
pub const DEFAULT_SENTINEL: &str = "__DEFAULT__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResult {
    pub excel_column: String,
    pub db_field_name: Option<String>,
    pub confidence: f32,
    pub source_location: Option<String>,
    pub match_method: MatchMethod,
    pub extracted_value: Option<String>,
    pub default_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_result_invariant_holds_for_success() {
        let pr = PageResult {
            document_id: Uuid::new_v4(),
            page_number: 1,
            content_type: ContentType::Text,
            hierarchical_data: Some(HierValue::Object(HierObject::default())),
            signatures: vec![],
            faces: vec![],
            token_usage: TokenUsage::default(),
            finish_reason: Some("stop".into()),
            duration_ms: 10,
            retries: 0,
            error: None,
        };
        assert!(pr.is_consistent());
    }

    #[test]
    fn page_result_invariant_holds_for_failure() {
        let pr = PageResult {
            document_id: Uuid::new_v4(),
            page_number: 1,
            content_type: ContentType::Image,
            hierarchical_data: None,
            signatures: vec![],
            faces: vec![],
            token_usage: TokenUsage::default(),
            finish_reason: None,
            duration_ms: 10,
            retries: 3,
            error: Some(StageError::RenderFailed {
                page: 1,
                detail: "boom".into(),
            }),
        };
        assert!(pr.is_consistent());
    }

    #[test]
    fn needs_review_threshold() {
        assert!(ExtractedField::compute_needs_review(Some(0.5)));
        assert!(!ExtractedField::compute_needs_review(Some(0.7)));
        assert!(!ExtractedField::compute_needs_review(Some(0.9)));
        assert!(!ExtractedField::compute_needs_review(None));
    }

    #[test]
    fn document_summary_averages_non_null_confidences_only() {
        let doc_id = Uuid::new_v4();
        let field = |confidence: Option<f32>, review: bool| ExtractedField {
            document_id: doc_id,
            job_id: Uuid::new_v4(),
            field_name: "a".into(),
            field_label: "A".into(),
            field_type: FieldType::Text,
            field_value: Some("x".into()),
            field_group: "a".into(),
            page_number: 1,
            field_order: 0,
            confidence_score: confidence,
            needs_manual_review: review,
            extraction_method: "without_template_extraction".into(),
            model_version: "gpt-4.1-nano".into(),
            tokens_used: 5,
            processing_time_ms: 1,
        };
        let fields = vec![field(Some(0.8), false), field(Some(0.4), true), field(None, false)];
        let summary = DocumentSummary::from_fields(&fields, DocumentStatus::Completed);
        assert_eq!(summary.total_fields_extracted, 3);
        assert_eq!(summary.fields_needing_review, 1);
        assert_eq!(summary.total_tokens_used, 15);
        assert!((summary.average_confidence.unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn document_summary_empty_confidences_is_none() {
        let summary = DocumentSummary::from_fields(&[], DocumentStatus::Failed);
        assert!(summary.average_confidence.is_none());
    }

    #[test]
    fn hier_object_typed_leaf() {
        let mut obj = HierObject::default();
        obj.insert("_type", HierValue::String("table".into()));
        obj.insert("value", HierValue::Array(vec![]));
        let (ty, val) = obj.as_typed_leaf().unwrap();
        assert_eq!(ty, "table");
        assert_eq!(val, &HierValue::Array(vec![]));
    }
}
