//! Per-page state machine and stage implementations (spec §4.5).
//!
//! `NEW → PAGE_READY → (TEXT_READY | IMAGE_RENDERED → IMAGE_ENHANCED →
//! IMAGE_ENCODED) → LLM_DONE → PARSED → MERGED → DONE`, with `FAILED`
//! reachable from any transition after retry exhaustion and `CANCELLED`
//! reachable at any stage boundary. The enum below exists purely for
//! observability (progress callbacks, logging); the actual control flow is
//! a single async function walking straight through the stages, since each
//! page's intermediate artifacts live in one local value rather than a
//! shared mutable map keyed by artifact (spec §9 design note).

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::{ExtractionTask, PdfResolverConfig, PipelineConfig};
use crate::detectors::{Detector, FaceDetector, SignatureDetector};
use crate::error::StageError;
use crate::llm::{LlmClient, LlmContent};
use crate::model::{ContentType, Detection, HierObject, HierValue, PageResult, TokenUsage};
use crate::pdf::{self, PdfResolver};
use crate::pipeline::pools::PagePools;
use crate::prompts::{self, PromptContext};

/// Coarse state of one page's journey through the pipeline, used only for
/// progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    New,
    PageReady,
    TextReady,
    ImageRendered,
    ImageEnhanced,
    ImageEncoded,
    LlmDone,
    Parsed,
    Merged,
    Done,
    Failed,
    Cancelled,
    Timeout,
}

/// A page result plus a debug-overlay image for any page where signatures
/// were detected on the image path (spec §4.5 S9: "also store a
/// debug-overlay image keyed by page number"). Not persisted; purely a
/// diagnostic artifact for callers that want to render it.
pub struct PageOutcome {
    pub result: PageResult,
    pub debug_overlay: Option<DynamicImage>,
}

pub struct PageContext<'a> {
    pub document_id: Uuid,
    pub page_index: usize,
    pub task: ExtractionTask,
    pub document_type: Option<&'a str>,
    pub prompt_context: PromptContext,
}

/// Dependencies a single page's stages need; bundled so `process_page`
/// doesn't take a dozen parameters.
pub struct PageDeps {
    pub pdf: Arc<PdfResolver>,
    pub pdf_config: PdfResolverConfig,
    pub llm: Arc<LlmClient>,
    pub signature_detector: Arc<dyn SignatureDetector>,
    pub face_detector: Arc<dyn FaceDetector>,
    pub pools: PagePools,
    pub pipeline_config: PipelineConfig,
}

/// Run one page through every stage of §4.5, returning a terminal
/// [`PageOutcome`] regardless of success or failure.
pub async fn process_page(
    deps: &PageDeps,
    pdf_bytes: Arc<Vec<u8>>,
    ctx: PageContext<'_>,
    cancel: &CancellationToken,
) -> PageOutcome {
    let started = Instant::now();
    let page_number = ctx.page_index + 1;

    if cancel.is_cancelled() {
        return cancelled_outcome(ctx.document_id, page_number);
    }

    // ── S1.3 / S1.4: page handle + text extraction (pool1) ──────────────
    let text_data = if deps.pipeline_config.prefer_text {
        let _permit = deps.pools.pdf.acquire().await.expect("pdf pool closed");
        match deps
            .pdf
            .extract_text(pdf_bytes.clone(), None, vec![ctx.page_index])
            .await
        {
            Ok(mut v) => v.pop().map(|(_, data)| data),
            Err(e) => {
                return failed_outcome(
                    ctx.document_id,
                    page_number,
                    StageError::RenderFailed {
                        page: page_number,
                        detail: e.to_string(),
                    },
                )
            }
        }
    } else {
        None
    };

    if cancel.is_cancelled() {
        return cancelled_outcome(ctx.document_id, page_number);
    }

    // ── S1.5: text-quality decision ──────────────────────────────────────
    let quality = text_data.as_ref().map(|td| {
        crate::pdf::TextQuality::score(
            td.text.chars().count(),
            td.text.split_whitespace().count(),
            td.text_blocks.len(),
            td.image_blocks.len(),
            &deps.pdf_config,
        )
    });

    let use_text_path = match &quality {
        Some(q) => q.confidence >= deps.pipeline_config.text_confidence_threshold,
        None => false,
    };

    let mut signatures: Vec<Detection> = Vec::new();
    let mut faces: Vec<Detection> = Vec::new();

    let (content_type, content, original_image) = if use_text_path {
        let td = text_data.expect("use_text_path implies text_data is Some");

        // Text-path detection runs eagerly on embedded image blocks found
        // in S1.4, not gated on an LLM hint (spec §4.5 S1.6).
        if deps.pipeline_config.detectors_enabled && !td.image_blocks.is_empty() {
            if let Ok(rendered) = render_single_page(deps, pdf_bytes.clone(), ctx.page_index).await {
                let crops: Vec<DynamicImage> = td
                    .image_blocks
                    .iter()
                    .map(|b| rendered.original_image.crop_imm(
                        b.bbox[0].max(0.0) as u32,
                        b.bbox[1].max(0.0) as u32,
                        (b.bbox[2] - b.bbox[0]).max(1.0) as u32,
                        (b.bbox[3] - b.bbox[1]).max(1.0) as u32,
                    ))
                    .collect();
                let (sigs, fcs) = detect_on_crops(deps, &crops).await;
                signatures.extend(sigs);
                faces.extend(fcs);
            }
        }

        (ContentType::Text, LlmContent::Text(td.text), None)
    } else {
        // ── S1.10 render → S3 PIL → S4 enhance → S6 encode ───────────────
        let rendered = match render_single_page(deps, pdf_bytes.clone(), ctx.page_index).await {
            Ok(r) => r,
            Err(e) => {
                return failed_outcome(
                    ctx.document_id,
                    page_number,
                    StageError::RenderFailed {
                        page: page_number,
                        detail: e.to_string(),
                    },
                )
            }
        };

        let _permit = deps.pools.encode.acquire().await.expect("encode pool closed");
        let enhanced = pdf::enhance_image(&rendered.processed_image);
        let data_url = match pdf::encode_image(&enhanced, &deps.pdf_config) {
            Ok(url) => url,
            Err(e) => {
                return failed_outcome(
                    ctx.document_id,
                    page_number,
                    StageError::RenderFailed {
                        page: page_number,
                        detail: e.to_string(),
                    },
                )
            }
        };

        (ContentType::Image, LlmContent::Image(data_url), Some(rendered.original_image))
    };

    if cancel.is_cancelled() {
        return cancelled_outcome(ctx.document_id, page_number);
    }

    let (prompt, schema) = prompts::lookup(ctx.task, content_type, ctx.document_type, &ctx.prompt_context);

    // ── S7/S8/S9 retry unit: LLM call (client owns S7+S8), then merge ───
    let doc_tag = ctx.document_id.to_string();
    let mut last_error: Option<StageError> = None;

    for attempt in 0..=deps.pipeline_config.max_retries_per_stage {
        if cancel.is_cancelled() {
            return cancelled_outcome(ctx.document_id, page_number);
        }
        if attempt > 0 {
            debug!(doc_tag, page_number, attempt, "retrying stage S7-S9");
        }

        let llm_result = {
            let _permit = deps.pools.llm.acquire().await.expect("llm pool closed");
            deps.llm
                .call(&prompt, &content, &schema, ctx.task, &doc_tag, page_number)
                .await
        };

        let mut response = match llm_result {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        let _permit = deps.pools.parse.acquire().await.expect("parse pool closed");

        // ── S8: clean any narrative text the model wrote inline among the
        // structured fields (notes/summary/description-style keys) before
        // merging detector output (spec §9 design note, markdown_cleanup).
        crate::pipeline::markdown_cleanup::clean_narrative_strings(&mut response.hierarchical_data);

        // ── S9: merge detector output ────────────────────────────────────
        if deps.pipeline_config.detectors_enabled {
            if let Some(original) = &original_image {
                if let HierValue::Object(obj) = &response.hierarchical_data {
                    if bool_hint(obj, "has_signature") && deps.signature_detector.is_enabled() {
                        signatures.extend(deps.signature_detector.detect_in_image(original).await);
                    }
                    if bool_hint(obj, "has_photo_id") && deps.face_detector.is_enabled() {
                        faces.extend(deps.face_detector.detect_in_image(original).await);
                    }
                }
            }
        }

        let debug_overlay = (!signatures.is_empty())
            .then(|| original_image.as_ref())
            .flatten()
            .map(|img| build_debug_overlay(img, &signatures));

        return PageOutcome {
            result: PageResult {
                document_id: ctx.document_id,
                page_number,
                content_type,
                hierarchical_data: Some(response.hierarchical_data),
                signatures,
                faces,
                token_usage: response.usage,
                finish_reason: response.finish_reason,
                duration_ms: started.elapsed().as_millis() as u64,
                retries: attempt,
                error: None,
            },
            debug_overlay,
        };
    }

    let error = last_error.unwrap_or(StageError::ProviderError {
        page: page_number,
        detail: "exhausted stage retries with no recorded error".into(),
    });
    warn!(doc_tag, page_number, %error, "page failed after stage retries");
    failed_outcome_with_usage(ctx.document_id, page_number, error, started.elapsed().as_millis() as u64)
}

async fn render_single_page(
    deps: &PageDeps,
    pdf_bytes: Arc<Vec<u8>>,
    page_index: usize,
) -> Result<crate::pdf::RenderedPage, crate::error::EngineError> {
    let _permit = deps.pools.pdf.acquire().await.expect("pdf pool closed");
    let mut pages = deps.pdf.render_pages(pdf_bytes, None, vec![page_index]).await?;
    pages
        .pop()
        .ok_or_else(|| crate::error::EngineError::Internal(format!("no render output for page {page_index}")))
}

async fn detect_on_crops(deps: &PageDeps, crops: &[DynamicImage]) -> (Vec<Detection>, Vec<Detection>) {
    if crops.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let _permit = deps.pools.detect.acquire().await.expect("detect pool closed");
    let mut sigs = Vec::new();
    let mut faces = Vec::new();
    if deps.signature_detector.is_enabled() {
        for batch in deps.signature_detector.detect_in_images_batch(crops).await {
            sigs.extend(batch.into_iter().filter(|d| d.is_hit));
        }
    }
    if deps.face_detector.is_enabled() {
        for batch in deps.face_detector.detect_in_images_batch(crops).await {
            faces.extend(batch.into_iter().filter(|d| d.is_hit));
        }
    }
    (sigs, faces)
}

fn bool_hint(obj: &HierObject, key: &str) -> bool {
    matches!(obj.get(key), Some(HierValue::Bool(true)))
}

/// Overlay detected signature boxes onto the original page image, for
/// debugging/QA (spec §4.5 S9). Drawn as filled semi-transparent rectangles
/// rather than pulling in a font-rendering dependency for labels.
fn build_debug_overlay(image: &DynamicImage, signatures: &[Detection]) -> DynamicImage {
    use image::Rgba;

    let mut canvas = image.to_rgba8();
    for sig in signatures {
        let [x0, y0, x1, y1] = sig.bbox;
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        let x0 = x0.clamp(0.0, w - 1.0) as u32;
        let y0 = y0.clamp(0.0, h - 1.0) as u32;
        let x1 = x1.clamp(0.0, w - 1.0) as u32;
        let y1 = y1.clamp(0.0, h - 1.0) as u32;
        for x in x0..=x1 {
            for &y in &[y0, y1] {
                canvas.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        for y in y0..=y1 {
            for &x in &[x0, x1] {
                canvas.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
    }
    DynamicImage::ImageRgba8(canvas)
}

fn cancelled_outcome(document_id: Uuid, page_number: usize) -> PageOutcome {
    PageOutcome {
        result: PageResult {
            document_id,
            page_number,
            content_type: ContentType::Text,
            hierarchical_data: None,
            signatures: Vec::new(),
            faces: Vec::new(),
            token_usage: TokenUsage::default(),
            finish_reason: None,
            duration_ms: 0,
            retries: 0,
            error: Some(StageError::Cancelled { page: page_number }),
        },
        debug_overlay: None,
    }
}

fn failed_outcome(document_id: Uuid, page_number: usize, error: StageError) -> PageOutcome {
    failed_outcome_with_usage(document_id, page_number, error, 0)
}

fn failed_outcome_with_usage(document_id: Uuid, page_number: usize, error: StageError, duration_ms: u64) -> PageOutcome {
    PageOutcome {
        result: PageResult {
            document_id,
            page_number,
            content_type: ContentType::Text,
            hierarchical_data: None,
            signatures: Vec::new(),
            faces: Vec::new(),
            token_usage: TokenUsage::default(),
            finish_reason: None,
            duration_ms,
            retries: 0,
            error: Some(error),
        },
        debug_overlay: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_hint_reads_true_flag() {
        let mut obj = HierObject::default();
        obj.insert("has_signature", HierValue::Bool(true));
        assert!(bool_hint(&obj, "has_signature"));
        assert!(!bool_hint(&obj, "has_photo_id"));
    }

    #[test]
    fn build_debug_overlay_preserves_dimensions() {
        let image = DynamicImage::new_rgb8(50, 50);
        let detections = vec![Detection {
            bbox: [5.0, 5.0, 20.0, 20.0],
            confidence: 0.9,
            is_hit: true,
            image_base64: String::new(),
        }];
        let overlay = build_debug_overlay(&image, &detections);
        assert_eq!((overlay.width(), overlay.height()), (50, 50));
    }

    #[test]
    fn cancelled_outcome_carries_cancelled_error() {
        let outcome = cancelled_outcome(Uuid::new_v4(), 3);
        assert!(matches!(outcome.result.error, Some(StageError::Cancelled { page: 3 })));
        assert!(outcome.result.is_consistent());
    }
}
