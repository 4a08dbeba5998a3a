//! Error types for the engine.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EngineError`] — **Fatal**: a document (or the whole run) cannot
//!   proceed at all (bad config, unreachable DB, unconfigured source
//!   adapter). Returned as `Err(EngineError)` from the top-level
//!   `process_document`/export entry points.
//!
//! * [`StageError`] — **Non-fatal**: a single page or stage failed
//!   (render glitch, transient API error, detector crash) but the document
//!   as a whole continues. Stored on [`crate::model::PageResult`] so
//!   callers can inspect partial success rather than losing the whole
//!   document to one bad page.
//!
//! The separation lets callers decide their own tolerance: abort on the
//! first page failure, log and continue, or collect all errors for a
//! post-run review queue entry.

use thiserror::Error;

/// All fatal errors returned by the engine.
///
/// Page-level failures use [`StageError`] and are stored on
/// [`crate::model::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Input / source errors ────────────────────────────────────────────
    #[error("document not found at source path '{path}'")]
    DocumentNotFound { path: String },

    #[error("source adapter '{adapter}' is not configured: {hint}")]
    AdapterNotConfigured { adapter: String, hint: String },

    #[error("failed to fetch document from source: {0}")]
    SourceFetchFailed(String),

    #[error("input is not a valid PDF/image (first bytes: {magic:?})")]
    NotADocument { magic: [u8; 4] },

    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: String },

    #[error("wrong password for PDF '{path}'")]
    WrongPassword { path: String },

    // ── LLM / provider errors ────────────────────────────────────────────
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page failed after all retries; the document has no usable
    /// content at all (spec §7 "all pages failed → `failed`").
    #[error("all {total} pages failed after {retries} retries each; first error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    // ── Persistence errors ───────────────────────────────────────────────
    #[error("bulk field insert failed for document {document_id}: {detail}")]
    BulkLoadFailed { document_id: String, detail: String },

    #[error("database pool error: {0}")]
    PoolError(String),

    // ── Template / mapping errors ────────────────────────────────────────
    #[error("template '{template_id}' has no columns")]
    EmptyTemplate { template_id: String },

    // ── Export errors ────────────────────────────────────────────────────
    #[error("failed to write export file '{path}': {source}")]
    ExportWriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("xlsx writer error: {0}")]
    XlsxError(String),

    // ── Timeout / cancellation ───────────────────────────────────────────
    #[error("pipeline deadline of {secs}s exceeded for document {document_id}")]
    PipelineTimeout { document_id: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

/// A non-fatal error confined to a single page or pipeline stage.
///
/// Stored alongside [`crate::model::PageResult`] when a page fails. The
/// overall document continues unless ALL pages fail (see
/// [`EngineError::AllPagesFailed`]).
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// PDF decode/render/encode failure (spec §7 `PageRenderError`).
    #[error("page {page}: render failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Network/HTTP-level failure talking to the LLM provider, already
    /// retried locally (spec §7 `TransportError`).
    #[error("page {page}: transport error after {retries} retries: {detail}")]
    TransportFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// Non-2xx response from the provider; not retried (spec §7 `ProviderError`).
    #[error("page {page}: provider returned an error: {detail}")]
    ProviderError { page: usize, detail: String },

    /// Model exhausted its reasoning budget without emitting output text
    /// (spec §4.2 "token-limit detection").
    #[error("page {page}: model consumed its reasoning budget without output")]
    TokenLimitExceeded { page: usize },

    /// JSON repair pipeline exhausted every strategy (spec §7 `JSONParseError`).
    #[error("page {page}: could not parse LLM response as JSON: {detail}")]
    JsonParseFailed { page: usize, detail: String },

    /// Object detector failed; always swallowed into an empty detection
    /// list by the caller (spec §7 `DetectorError`, never fatal).
    #[error("page {page}: detector '{detector}' failed: {detail}")]
    DetectorFailed {
        page: usize,
        detector: String,
        detail: String,
    },

    /// LLM call timed out at the transport level.
    #[error("page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// Page was skipped because the document-level cancellation token was set.
    #[error("page {page}: cancelled")]
    Cancelled { page: usize },
}

impl StageError {
    pub fn page(&self) -> usize {
        match self {
            StageError::RenderFailed { page, .. }
            | StageError::TransportFailed { page, .. }
            | StageError::ProviderError { page, .. }
            | StageError::TokenLimitExceeded { page }
            | StageError::JsonParseFailed { page, .. }
            | StageError::DetectorFailed { page, .. }
            | StageError::Timeout { page, .. }
            | StageError::Cancelled { page } => *page,
        }
    }

    /// Whether this error should count toward a document's failed-page
    /// list for the `needs_review` rollup, as opposed to a swallowed,
    /// never-fatal detector error.
    pub fn is_page_fatal(&self) -> bool {
        !matches!(self, StageError::DetectorFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_errors_are_not_page_fatal() {
        let e = StageError::DetectorFailed {
            page: 1,
            detector: "signature".into(),
            detail: "onnx session panic".into(),
        };
        assert!(!e.is_page_fatal());
        assert_eq!(e.page(), 1);
    }

    #[test]
    fn render_failures_are_page_fatal() {
        let e = StageError::RenderFailed {
            page: 2,
            detail: "corrupt xref".into(),
        };
        assert!(e.is_page_fatal());
    }
}
