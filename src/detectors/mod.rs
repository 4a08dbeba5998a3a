//! Object Detectors (C4, spec §4.4).
//!
//! Two detector traits — [`SignatureDetector`] and [`FaceDetector`] — with
//! identical capability sets, matching the source Python's symmetric
//! `yolo_helpers.py`/`yolo_face_helpers.py` design. No ONNX dependency is
//! required to build the crate: the default implementations are no-ops,
//! satisfying the spec's "detectors are optional" contract. Enable the
//! `detectors` feature for a real ONNX-backed implementation.

pub mod face;
pub mod signature;

pub use face::{FaceDetector, NoopFaceDetector};
pub use signature::{NoopSignatureDetector, SignatureDetector};

#[cfg(feature = "detectors")]
pub mod onnx;

use crate::model::Detection;
use async_trait::async_trait;
use image::DynamicImage;

/// Shared capability set for both detector kinds (spec §4.4).
#[async_trait]
pub trait Detector: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn detect_in_image(&self, image: &DynamicImage) -> Vec<Detection>;

    /// Batch inference is preferred; on any batch error, the whole batch
    /// returns empty — per-image fallback is explicitly not attempted
    /// (spec §4.4: "cost vs. correctness tradeoff").
    async fn detect_in_images_batch(&self, images: &[DynamicImage]) -> Vec<Vec<Detection>>;
}
