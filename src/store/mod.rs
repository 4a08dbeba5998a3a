//! Persistence layer: the fields store, document store, template store, and
//! transcript store named in spec §6 ("Persisted state").
//!
//! Not present in the teacher (it never persists anything — `convert()`
//! returns a `ConversionOutput` the caller writes to a file). Grounded in
//! `original_source/backend-bulk/.../bulk_insert_service.py`'s `COPY`-based
//! bulk loader and same-transaction document summary update, reimplemented
//! over `tokio-postgres`'s binary `COPY` API behind a `deadpool-postgres`
//! pool (pattern: `lexlapax-rs-llmspell`'s `llmspell-storage::backends::postgres`
//! — a small `Config::new(conn_string)` + pooled client, feature-gated there,
//! a hard dependency here since persistence is core to this engine rather
//! than one storage backend among several).
//!
//! Every store is a trait so the pipeline/export layers can be tested
//! against an in-memory fake without a live database (see
//! `tests::fakes` in each submodule).

pub mod documents;
pub mod fields;
pub mod pool;
pub mod templates;
pub mod transcripts;

pub use documents::{DocumentStore, PostgresDocumentStore};
pub use fields::{FieldsStore, PostgresFieldsStore};
pub use pool::{build_pool, DbPool};
pub use templates::{PostgresTemplateStore, TemplateStore};
pub use transcripts::{PostgresTranscriptStore, TranscriptStore};
