//! Face detector (spec §4.4).
//!
//! For faces, the returned crop is expanded (roughly 50% on each side, 30%
//! on top, 110% on the bottom of the detected face box) to capture photo-ID
//! context around a face — implemented as [`expand_face_bbox`] so the
//! pipeline can apply it uniformly regardless of which concrete detector
//! produced the raw box.

use async_trait::async_trait;
use image::DynamicImage;

use crate::detectors::Detector;
use crate::model::Detection;

/// Capability trait specialized for face detection. Identical shape to
/// [`crate::detectors::signature::SignatureDetector`] per spec §4.4.
#[async_trait]
pub trait FaceDetector: Detector {}

/// Default, always-disabled face detector.
pub struct NoopFaceDetector;

#[async_trait]
impl Detector for NoopFaceDetector {
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

impl FaceDetector for NoopFaceDetector {}

/// Expand a detected face bounding box to capture surrounding photo-ID
/// context (spec §4.4: ~50% sides, 30% top, 110% bottom).
pub fn expand_face_bbox(bbox: [f32; 4], image_dims: (f32, f32)) -> [f32; 4] {
    let [x0, y0, x1, y1] = bbox;
    let width = x1 - x0;
    let height = y1 - y0;

    let expanded = [
        (x0 - width * 0.5).max(0.0),
        (y0 - height * 0.3).max(0.0),
        (x1 + width * 0.5).min(image_dims.0),
        (y1 + height * 1.1).min(image_dims.1),
    ];
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_face_bbox_grows_asymmetrically() {
        let bbox = [100.0, 100.0, 200.0, 200.0];
        let expanded = expand_face_bbox(bbox, (1000.0, 1000.0));
        // width=100,height=100: left/right -50, top -30, bottom +110
        assert_eq!(expanded, [50.0, 70.0, 250.0, 310.0]);
    }

    #[test]
    fn expand_face_bbox_clamps_to_image_bounds() {
        let bbox = [5.0, 5.0, 50.0, 50.0];
        let expanded = expand_face_bbox(bbox, (60.0, 60.0));
        assert!(expanded[0] >= 0.0 && expanded[1] >= 0.0);
        assert!(expanded[2] <= 60.0 && expanded[3] <= 60.0);
    }

    #[tokio::test]
    async fn noop_detector_is_disabled_and_empty() {
        let d = NoopFaceDetector;
        assert!(!d.is_enabled());
        let img = DynamicImage::new_rgb8(10, 10);
        assert!(d.detect_in_image(&img).await.is_empty());
    }
}
