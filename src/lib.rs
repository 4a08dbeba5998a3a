//! # docbulk-engine
//!
//! Bulk document extraction and mapping engine: turns a folder (or other
//! pluggable source) of PDFs/scanned images into flattened, typed fields in
//! Postgres and, from there, template-driven Excel/CSV exports, by driving
//! every page through a vision-LLM page pipeline.
//!
//! ## Why this crate?
//!
//! A single-document PDF-to-Markdown converter and a bulk extraction-and-
//! mapping engine share the same hard problem — getting a vision LLM to read
//! a rasterised page reliably — but diverge everywhere past that: this crate
//! adds per-field confidence and provenance, a typed/ordered field model,
//! fuzzy + AI-assisted column mapping against a caller-supplied template, a
//! COPY-based bulk loader sized for thousands of fields per document, and
//! pluggable document sources instead of a single local path or URL.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Source adapter (folder/object-store/…)
//!  │
//!  ├─ 1. Resolve   page count, text blocks, rendered images (pdfium)
//!  ├─ 2. Pipeline   per-page: text-vs-image branch, object detectors,
//!  │                 vision-LLM call with JSON-repair, schema normalisation
//!  ├─ 3. Flatten    ordered hierarchical JSON → dotted/indexed field rows
//!  ├─ 4. Persist    COPY-based bulk insert + document summary roll-up
//!  ├─ 5. Transcript  searchable page/section/field index
//!  ├─ 6. Mapping     template columns → fields (direct/keyword/AI/fuzzy)
//!  └─ 7. Export      per-template Excel/CSV with array expansion
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbulk_engine::config::EngineConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = EngineConfig::builder()
//!         .model("gpt-4.1-nano")
//!         .max_workers(8)
//!         .build()?;
//!     let _ = config;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `cli`       | on      | Enables the `docbulk-ingest`/`docbulk-export` binaries |
//! | `bundled`   | on      | Embeds the pdfium shared library at compile time |
//! | `detectors` | off     | ONNX-backed signature/face detectors |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! docbulk-engine = { version = "0.1", default-features = false, features = ["bundled"] }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod export;
pub mod flatten;
pub mod llm;
pub mod mapping;
pub mod model;
pub mod pdf;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod prompts;
pub mod source;
pub mod store;
pub mod transcript;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancellationToken;
pub use config::{EngineConfig, EngineConfigBuilder, ExtractionTask};
pub use engine::{Engine, ProcessDocumentOutcome};
pub use error::{EngineError, StageError};
pub use export::{export, ExportFormat, ExportRequest};
pub use mapping::resolve_mappings;
pub use model::{
    Document, DocumentStatus, DocumentSummary, ExtractedField, ExtractionTemplate, MappingResult, PageResult,
    Transcript,
};
pub use pipeline::PagePipeline;
pub use source::{DocumentInfo, FolderSourceAdapter, SourceAdapter, SourceConfig};
pub use store::{DbPool, DocumentStore, FieldsStore, TemplateStore, TranscriptStore};
pub use transcript::build_transcript;
