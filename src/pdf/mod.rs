//! PDF Page Resolver (C1, spec §4.1).
//!
//! Decodes PDF bytes, counts pages, extracts text/blocks, renders pages to
//! images, and encodes them for the LLM client. Grounded in the teacher's
//! `pipeline/render.rs` (pdfium load/render via `spawn_blocking`) and
//! `pipeline/encode.rs` (base64 data-URL encoding), extended with the
//! text-vs-image decision, cropping, and coordinate conversion the teacher
//! never needed (it always rendered whole pages to Markdown).

pub mod resolver;
pub mod text_quality;

pub use resolver::{
    coordinate_convert, crop_region, encode_image, enhance_image, ImageBlock, PdfResolver, RenderedPage, TextBlock,
    TextData,
};
pub use text_quality::TextQuality;
