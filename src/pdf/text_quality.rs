//! Text-quality scoring used to pick the text path over the image path
//! (spec §4.1, §4.5 S1.5).

use crate::config::PdfResolverConfig;

/// Quality signal for a page's extracted text, used to decide whether the
/// text path is reliable enough to skip rendering/encoding an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextQuality {
    pub char_count: usize,
    pub word_count: usize,
    pub confidence: f32,
    pub is_selectable: bool,
    pub text_blocks_count: usize,
    pub image_blocks_count: usize,
}

impl TextQuality {
    /// Score the extracted text against a density/ratio heuristic (spec
    /// §4.1): ideal `words/chars` ratio `[0.10, 0.25]`, acceptable
    /// `[0.05, 0.35]`, plus density bonuses for char count and text-block
    /// count, capped at 1.0.
    pub fn score(
        char_count: usize,
        word_count: usize,
        text_blocks_count: usize,
        image_blocks_count: usize,
        config: &PdfResolverConfig,
    ) -> Self {
        let ratio = if char_count == 0 {
            0.0
        } else {
            word_count as f32 / char_count as f32
        };

        let (ideal_lo, ideal_hi) = config.ideal_ratio;
        let (acc_lo, acc_hi) = config.acceptable_ratio;

        let ratio_score = if ratio >= ideal_lo && ratio <= ideal_hi {
            1.0
        } else if ratio >= acc_lo && ratio <= acc_hi {
            0.6
        } else {
            0.1
        };

        // Density bonus: more characters and more distinct text blocks both
        // increase confidence that the extracted text is real body content
        // rather than stray OCR artifacts or a scanned watermark.
        let char_density_bonus = (char_count as f32 / 500.0).min(0.2);
        let block_bonus = (text_blocks_count as f32 / 10.0).min(0.15);

        // Text-vs-image ratio: pages dominated by image blocks (scans with
        // a thin OCR text layer) are penalized.
        let total_blocks = text_blocks_count + image_blocks_count;
        let image_ratio_penalty = if total_blocks == 0 {
            0.0
        } else {
            (image_blocks_count as f32 / total_blocks as f32) * 0.3
        };

        let confidence = (ratio_score * 0.5 + char_density_bonus + block_bonus - image_ratio_penalty)
            .clamp(0.0, 1.0);

        Self {
            char_count,
            word_count,
            confidence,
            is_selectable: confidence >= config.selectable_threshold,
            text_blocks_count,
            image_blocks_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_prose_page_is_selectable() {
        let config = PdfResolverConfig::default();
        // ~1200 chars, ~200 words -> ratio ~0.167, within ideal band.
        let tq = TextQuality::score(1200, 200, 8, 0, &config);
        assert!(tq.is_selectable, "confidence was {}", tq.confidence);
    }

    #[test]
    fn sparse_scanned_page_is_not_selectable() {
        let config = PdfResolverConfig::default();
        let tq = TextQuality::score(20, 15, 0, 4, &config);
        assert!(!tq.is_selectable, "confidence was {}", tq.confidence);
    }

    #[test]
    fn selectable_iff_confidence_above_threshold() {
        let config = PdfResolverConfig::default();
        for (chars, words, tblocks, iblocks) in
            [(1200, 200, 8, 0), (20, 15, 0, 4), (400, 70, 3, 1), (0, 0, 0, 0)]
        {
            let tq = TextQuality::score(chars, words, tblocks, iblocks, &config);
            assert_eq!(tq.is_selectable, tq.confidence >= config.selectable_threshold);
        }
    }
}
