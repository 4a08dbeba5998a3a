//! Signature detector (spec §4.4).
//!
//! For signatures, if the source is a PDF image block, the block image is
//! returned directly as the cropped signature (no re-cropping) — that
//! routing decision lives in the pipeline (spec §4.5 S9), not here; this
//! module only owns the detect-and-score step.

use async_trait::async_trait;
use image::DynamicImage;

use crate::detectors::Detector;
use crate::model::Detection;

/// Capability trait specialized for signature detection. Identical shape to
/// [`crate::detectors::face::FaceDetector`] per spec §4.4.
#[async_trait]
pub trait SignatureDetector: Detector {}

/// Default, always-disabled signature detector. Used whenever the
/// `detectors` feature is off, or no model file is configured.
pub struct NoopSignatureDetector;

#[async_trait]
impl Detector for NoopSignatureDetector {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn detect_in_image(&self, _image: &DynamicImage) -> Vec<Detection> {
        Vec::new()
    }

    async fn detect_in_images_batch(&self, images: &[DynamicImage]) -> Vec<Vec<Detection>> {
        vec![Vec::new(); images.len()]
    }
}

impl SignatureDetector for NoopSignatureDetector {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_detector_is_disabled_and_empty() {
        let d = NoopSignatureDetector;
        assert!(!d.is_enabled());
        let img = DynamicImage::new_rgb8(10, 10);
        assert!(d.detect_in_image(&img).await.is_empty());
        let batch = d.detect_in_images_batch(&[img.clone(), img]).await;
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|d| d.is_empty()));
    }
}
