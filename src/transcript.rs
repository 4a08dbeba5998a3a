//! Transcript Builder (C7, spec §4.7).
//!
//! Not present in the teacher. Grounded in `template_mapping_service.py`'s
//! consumption pattern of `field_locations`/`section_index` — those are
//! exactly the indexes this module produces, built here from the already-
//! flattened field paths rather than re-deriving text from scratch.

use std::time::Instant;

use uuid::Uuid;

use crate::flatten::flatten_value;
use crate::model::{FieldLocation, PageResult, SectionRange, Transcript};

/// Build a searchable page/section/field index from a document's already-
/// processed pages (spec §4.7). `pages` must be in page order; pages with
/// no `hierarchical_data` (failed/cancelled) contribute nothing.
pub fn build_transcript(document_id: Uuid, job_id: Uuid, pages: &[PageResult]) -> Transcript {
    let started = Instant::now();

    let mut full_transcript = String::new();
    let mut page_transcripts = Vec::with_capacity(pages.len());
    let mut section_index: std::collections::BTreeMap<String, SectionRange> = std::collections::BTreeMap::new();
    let mut field_locations: std::collections::BTreeMap<String, FieldLocation> = std::collections::BTreeMap::new();

    for page in pages {
        let page_text = render_page_text(page, &mut section_index, &mut field_locations);
        full_transcript.push_str(&format!("=== Page {} ===\n{}\n", page.page_number, page_text));
        page_transcripts.push(page_text);
    }

    let total_sections = section_index.len();

    Transcript {
        document_id,
        job_id,
        full_transcript,
        page_transcripts,
        section_index,
        field_locations,
        total_pages: pages.len(),
        total_sections,
        generation_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn render_page_text(
    page: &PageResult,
    section_index: &mut std::collections::BTreeMap<String, SectionRange>,
    field_locations: &mut std::collections::BTreeMap<String, FieldLocation>,
) -> String {
    let Some(hv) = &page.hierarchical_data else {
        return String::new();
    };

    let mut text = String::new();
    let mut last_group: Option<String> = None;

    for leaf in flatten_value(hv) {
        if last_group.as_deref() != Some(leaf.field_group.as_str()) {
            text.push_str(&format!("## {}\n", leaf.field_group));
            last_group = Some(leaf.field_group.clone());
        }
        text.push_str(&format!("{}: {}\n", leaf.path, leaf.value.as_deref().unwrap_or("")));

        section_index
            .entry(leaf.field_group.clone())
            .and_modify(|r| {
                r.first_page = r.first_page.min(page.page_number);
                r.last_page = r.last_page.max(page.page_number);
            })
            .or_insert(SectionRange {
                first_page: page.page_number,
                last_page: page.page_number,
            });

        field_locations.insert(
            leaf.path.clone(),
            FieldLocation {
                page: page.page_number,
                section: leaf.field_group,
            },
        );
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentType, HierObject, HierValue, TokenUsage};

    fn page(page_number: usize, hv: HierValue) -> PageResult {
        PageResult {
            document_id: Uuid::new_v4(),
            page_number,
            content_type: ContentType::Text,
            hierarchical_data: Some(hv),
            signatures: vec![],
            faces: vec![],
            token_usage: TokenUsage::default(),
            finish_reason: None,
            duration_ms: 0,
            retries: 0,
            error: None,
        }
    }

    fn obj(pairs: Vec<(&str, HierValue)>) -> HierValue {
        let mut o = HierObject::default();
        for (k, v) in pairs {
            o.insert(k, v);
        }
        HierValue::Object(o)
    }

    #[test]
    fn builds_full_transcript_with_page_markers() {
        let p1 = page(1, obj(vec![("invoice", obj(vec![("total", HierValue::String("100".into()))]))]));
        let transcript = build_transcript(Uuid::new_v4(), Uuid::new_v4(), &[p1]);
        assert!(transcript.full_transcript.contains("=== Page 1 ==="));
        assert!(transcript.full_transcript.contains("invoice.total: 100"));
        assert_eq!(transcript.total_pages, 1);
    }

    #[test]
    fn section_index_spans_pages() {
        let p1 = page(1, obj(vec![("customer", obj(vec![("name", HierValue::String("ACME".into()))]))]));
        let p2 = page(2, obj(vec![("customer", obj(vec![("city", HierValue::String("Denver".into()))]))]));
        let transcript = build_transcript(Uuid::new_v4(), Uuid::new_v4(), &[p1, p2]);
        let range = transcript.section_index.get("customer").unwrap();
        assert_eq!(range.first_page, 1);
        assert_eq!(range.last_page, 2);
        assert_eq!(transcript.total_sections, 1);
    }

    #[test]
    fn field_locations_record_page_and_section() {
        let p1 = page(3, obj(vec![("invoice", obj(vec![("total", HierValue::String("9.99".into()))]))]));
        let transcript = build_transcript(Uuid::new_v4(), Uuid::new_v4(), &[p1]);
        let loc = transcript.field_locations.get("invoice.total").unwrap();
        assert_eq!(loc.page, 3);
        assert_eq!(loc.section, "invoice");
    }

    #[test]
    fn failed_page_contributes_empty_text() {
        let mut p1 = page(1, HierValue::Null);
        p1.hierarchical_data = None;
        let transcript = build_transcript(Uuid::new_v4(), Uuid::new_v4(), &[p1]);
        assert_eq!(transcript.page_transcripts[0], "");
    }
}
