//! Mapping Resolver (C8, spec §4.8).
//!
//! Grounded in `template_mapping_service.py`'s `_map_single_column` /
//! `_fuzzy_match_field` / `_ai_suggest_mappings_single_batch` /
//! `_find_fuzzy_field_match`, reimplemented with [`strsim`] instead of
//! Python's `difflib.SequenceMatcher`. Operates on data the caller has
//! already loaded (available fields, transcript, template) rather than
//! reaching into a store itself, which keeps resolution pure enough to
//! unit-test without a database or network call.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::ExtractionTask;
use crate::error::StageError;
use crate::llm::{LlmClient, LlmContent};
use crate::model::{
    ExtractedField, ExtractionTemplate, FieldLocation, HierValue, MappingResult, MatchMethod, TemplateColumn,
    Transcript, DEFAULT_SENTINEL,
};

const AI_BATCH_SIZE: usize = 20;
const AI_MAX_CONCURRENT_BATCHES: usize = 3;
const AI_FUZZY_ACCEPT_THRESHOLD: f32 = 0.7;
const FALLBACK_FUZZY_ACCEPT_THRESHOLD: f32 = 0.4;
const TEMPLATE_OVERLAP_THRESHOLD: f32 = 0.8;

/// Resolve every column of `template` to a [`MappingResult`], in template
/// column order (spec §4.8, invariant "mapping order equals template
/// order"). `llm` is optional: when absent, AI-assisted resolution is
/// skipped and unresolved columns fall through directly to fuzzy matching.
pub async fn resolve_mappings(
    template: &ExtractionTemplate,
    fields: &[ExtractedField],
    transcript: Option<&Transcript>,
    llm: Option<&LlmClient>,
    doc_tag: &str,
) -> Vec<MappingResult> {
    let mut results: Vec<Option<MappingResult>> = vec![None; template.columns.len()];
    let mut ai_needed: Vec<usize> = Vec::new();

    for (i, col) in template.columns.iter().enumerate() {
        if let Some(path) = &col.db_field_path {
            results[i] = Some(direct_mapping(col, path, fields, transcript));
            continue;
        }
        if let Some(default) = &col.default_value {
            results[i] = Some(default_mapping(col, default));
            continue;
        }
        if let Some((field_name, location)) = keyword_search(col, fields, transcript) {
            let extracted_value = lookup_field_value(fields, &field_name);
            results[i] = Some(MappingResult {
                excel_column: col.excel_column.clone(),
                db_field_name: Some(field_name),
                confidence: 0.85,
                source_location: location,
                match_method: MatchMethod::KeywordSearch,
                extracted_value,
                default_value: None,
            });
            continue;
        }
        ai_needed.push(i);
    }

    if !ai_needed.is_empty() {
        if let Some(llm) = llm {
            let suggestions = run_ai_batches(llm, template, &ai_needed, fields, doc_tag).await;
            for &idx in &ai_needed {
                let col = &template.columns[idx];
                if let Some(s) = suggestions.iter().find(|s| s.excel_column == col.excel_column) {
                    results[idx] = Some(resolve_ai_suggestion(col, s, fields));
                }
            }
        }
    }

    for idx in ai_needed {
        if results[idx].is_none() {
            results[idx] = Some(fallback_fuzzy_match(&template.columns[idx], fields));
        }
    }

    results.into_iter().map(|r| r.expect("every column resolved")).collect()
}

fn direct_mapping(
    col: &TemplateColumn,
    path: &str,
    fields: &[ExtractedField],
    transcript: Option<&Transcript>,
) -> MappingResult {
    MappingResult {
        excel_column: col.excel_column.clone(),
        db_field_name: Some(path.to_string()),
        confidence: 0.95,
        source_location: transcript.and_then(|t| t.field_locations.get(path)).map(describe_location),
        match_method: MatchMethod::DbFieldPathDirect,
        extracted_value: lookup_field_value(fields, path),
        default_value: col.default_value.clone(),
    }
}

fn default_mapping(col: &TemplateColumn, default: &str) -> MappingResult {
    MappingResult {
        excel_column: col.excel_column.clone(),
        db_field_name: Some(DEFAULT_SENTINEL.to_string()),
        confidence: 0.93,
        source_location: None,
        match_method: MatchMethod::DefaultValue,
        extracted_value: None,
        default_value: Some(default.to_string()),
    }
}

fn describe_location(loc: &FieldLocation) -> String {
    format!("page {} / {}", loc.page, loc.section)
}

fn lookup_field_value(fields: &[ExtractedField], field_name: &str) -> Option<String> {
    fields
        .iter()
        .find(|f| f.field_name == field_name)
        .and_then(|f| f.field_value.clone())
}

/// Normalize a field or column name for comparison: lowercase, drop all
/// non-alphabetic characters (spec §4.8 "normalize both sides").
pub(crate) fn normalize_field_name(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphabetic()).collect::<String>().to_lowercase()
}

/// Sequence-ratio-only comparison (no substring bonus), used by the
/// fallback combined score.
fn sequence_ratio(a: &str, b: &str) -> f32 {
    strsim::normalized_levenshtein(&normalize_field_name(a), &normalize_field_name(b)) as f32
}

/// AI-suggestion fuzzy validation score: sequence ratio, +0.3 substring
/// bonus, 1.0 on exact normalized equality (spec §4.8 step 3).
fn fuzzy_score(a: &str, b: &str) -> f32 {
    let na = normalize_field_name(a);
    let nb = normalize_field_name(b);
    if na == nb {
        return 1.0;
    }
    let mut score = strsim::normalized_levenshtein(&na, &nb) as f32;
    if !na.is_empty() && !nb.is_empty() && (na.contains(&nb) || nb.contains(&na)) {
        score += 0.3;
    }
    score.min(1.0)
}

/// Word-overlap boost for [`fallback_fuzzy_match`]: splits the Excel column
/// name itself (not any template-configured keyword list) against the
/// candidate field name on `_`, matching `_fuzzy_match_fallback`'s
/// `excel_words = set(excel_normalized.split('_'))` /
/// `field_words = set(field_normalized.split('_'))` exactly — a template
/// column with no `search_keywords` configured still gets a real keyword
/// boost here.
fn keyword_overlap(col: &TemplateColumn, field_name: &str) -> f32 {
    let excel_normalized = col.excel_column.to_lowercase().replace(' ', "_").replace('-', "_");
    let field_normalized = field_name.to_lowercase();

    let excel_words: HashSet<&str> = excel_normalized.split('_').collect();
    let field_words: HashSet<&str> = field_normalized.split('_').collect();

    let overlap = excel_words.intersection(&field_words).count();
    overlap as f32 / excel_words.len().max(1) as f32
}

fn keyword_search(
    col: &TemplateColumn,
    fields: &[ExtractedField],
    transcript: Option<&Transcript>,
) -> Option<(String, Option<String>)> {
    if col.search_keywords.is_empty() {
        return None;
    }
    let keywords: Vec<String> = col
        .search_keywords
        .iter()
        .map(|k| normalize_field_name(k))
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return None;
    }
    let field = fields
        .iter()
        .find(|f| keywords.iter().any(|k| normalize_field_name(&f.field_name).contains(k.as_str())))?;
    let location = transcript
        .and_then(|t| t.field_locations.get(&field.field_name))
        .map(describe_location);
    Some((field.field_name.clone(), location))
}

fn unmapped(col: &TemplateColumn) -> MappingResult {
    MappingResult {
        excel_column: col.excel_column.clone(),
        db_field_name: None,
        confidence: 0.0,
        source_location: None,
        match_method: MatchMethod::Unmapped,
        extracted_value: None,
        default_value: col.default_value.clone(),
    }
}

fn resolve_ai_suggestion(col: &TemplateColumn, suggestion: &AiSuggestion, fields: &[ExtractedField]) -> MappingResult {
    let Some(suggested) = suggestion.suggested_field.as_ref().filter(|f| !f.is_empty()) else {
        return unmapped(col);
    };

    if let Some(real) = fields.iter().find(|f| &f.field_name == suggested) {
        return MappingResult {
            excel_column: col.excel_column.clone(),
            db_field_name: Some(real.field_name.clone()),
            confidence: suggestion.confidence,
            source_location: None,
            match_method: MatchMethod::AiAssisted,
            extracted_value: suggestion.extracted_value.clone().or_else(|| real.field_value.clone()),
            default_value: col.default_value.clone(),
        };
    }

    let best = fields
        .iter()
        .map(|f| (f, fuzzy_score(suggested, &f.field_name)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    if let Some((field, score)) = best {
        if score >= AI_FUZZY_ACCEPT_THRESHOLD {
            return MappingResult {
                excel_column: col.excel_column.clone(),
                db_field_name: Some(field.field_name.clone()),
                confidence: (suggestion.confidence - 0.1).max(0.0),
                source_location: None,
                match_method: MatchMethod::AiAssisted,
                extracted_value: suggestion.extracted_value.clone().or_else(|| field.field_value.clone()),
                default_value: col.default_value.clone(),
            };
        }
    }

    unmapped(col)
}

fn fallback_fuzzy_match(col: &TemplateColumn, fields: &[ExtractedField]) -> MappingResult {
    let best = fields
        .iter()
        .map(|f| {
            let score = sequence_ratio(&col.excel_column, &f.field_name) * 0.6 + keyword_overlap(col, &f.field_name) * 0.4;
            (f, score)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    if let Some((field, score)) = best {
        if score >= FALLBACK_FUZZY_ACCEPT_THRESHOLD {
            return MappingResult {
                excel_column: col.excel_column.clone(),
                db_field_name: Some(field.field_name.clone()),
                confidence: score,
                source_location: None,
                match_method: MatchMethod::FuzzyMatch,
                extracted_value: field.field_value.clone(),
                default_value: col.default_value.clone(),
            };
        }
    }

    unmapped(col)
}

#[derive(Debug, Clone)]
struct AiSuggestion {
    excel_column: String,
    suggested_field: Option<String>,
    extracted_value: Option<String>,
    confidence: f32,
}

fn ai_suggestion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "suggestions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "excel_column": {"type": "string"},
                        "suggested_field": {"type": ["string", "null"]},
                        "extracted_value": {"type": ["string", "null"]},
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"},
                    },
                    "required": ["excel_column", "confidence"],
                },
            },
        },
        "required": ["suggestions"],
    })
}

fn build_ai_prompt(columns: &[&TemplateColumn], fields: &[ExtractedField]) -> String {
    let mut prompt = String::from(
        "You are mapping spreadsheet column headers onto extracted document fields.\n\
         For each Excel column below, suggest the best-matching extracted field (by its dotted path),\n\
         or null if nothing fits. Return JSON: {\"suggestions\": [{\"excel_column\", \"suggested_field\",\n\
         \"extracted_value\", \"confidence\", \"reasoning\"}, ...], one entry per column, in order.\n\n## Columns\n",
    );
    for col in columns {
        prompt.push_str(&format!(
            "- \"{}\" (section hint: {:?}, field hint: {:?}, example: {:?}, default: {:?}, post-process: {:?})\n",
            col.excel_column, col.source_section, col.source_field, col.example_value, col.default_value, col.post_process_type
        ));
    }
    prompt.push_str("\n## Available fields (grouped by section, sample values)\n");
    prompt.push_str(&describe_available_fields(fields));
    prompt
}

fn describe_available_fields(fields: &[ExtractedField]) -> String {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<&str, Vec<&ExtractedField>> = BTreeMap::new();
    for f in fields {
        groups.entry(f.field_group.as_str()).or_default().push(f);
    }
    let mut out = String::new();
    for (group, group_fields) in groups {
        out.push_str(&format!("### {group}\n"));
        for f in group_fields.iter().take(8) {
            out.push_str(&format!("- {} = {}\n", f.field_name, f.field_value.as_deref().unwrap_or("")));
        }
    }
    out
}

fn parse_suggestions(value: &HierValue) -> Vec<AiSuggestion> {
    let HierValue::Object(obj) = value else { return Vec::new() };
    let Some(HierValue::Array(items)) = obj.get("suggestions") else { return Vec::new() };

    items
        .iter()
        .filter_map(|item| {
            let HierValue::Object(o) = item else { return None };
            let excel_column = match o.get("excel_column") {
                Some(HierValue::String(s)) => s.clone(),
                _ => return None,
            };
            let suggested_field = match o.get("suggested_field") {
                Some(HierValue::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            };
            let extracted_value = match o.get("extracted_value") {
                Some(HierValue::String(s)) => Some(s.clone()),
                Some(HierValue::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            let confidence = match o.get("confidence") {
                Some(HierValue::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
                _ => 0.0,
            };
            Some(AiSuggestion {
                excel_column,
                suggested_field,
                extracted_value,
                confidence,
            })
        })
        .collect()
}

/// Batch AI-assisted suggestions for the columns in `ai_needed`: batch size
/// 20, up to 3 batches in flight (spec §4.8 step 3). A batch that fails
/// (transport/parse error) contributes no suggestions for its columns,
/// which then fall through to fallback fuzzy matching rather than failing
/// the whole resolution.
async fn run_ai_batches(
    llm: &LlmClient,
    template: &ExtractionTemplate,
    ai_needed: &[usize],
    fields: &[ExtractedField],
    doc_tag: &str,
) -> Vec<AiSuggestion> {
    let chunks: Vec<Vec<usize>> = ai_needed.chunks(AI_BATCH_SIZE).map(|c| c.to_vec()).collect();

    let batch_results: Vec<Result<Vec<AiSuggestion>, StageError>> = stream::iter(chunks.into_iter().map(|chunk| {
        let columns: Vec<&TemplateColumn> = chunk.iter().map(|&i| &template.columns[i]).collect();
        async move {
            let prompt = build_ai_prompt(&columns, fields);
            let schema = ai_suggestion_schema();
            let response = llm
                .call(
                    &prompt,
                    &LlmContent::Text("Return the JSON suggestions now.".to_string()),
                    &schema,
                    ExtractionTask::TemplateMatching,
                    doc_tag,
                    0,
                )
                .await?;
            Ok(parse_suggestions(&response.hierarchical_data))
        }
    }))
    .buffer_unordered(AI_MAX_CONCURRENT_BATCHES)
    .collect()
    .await;

    let mut all = Vec::new();
    for result in batch_results {
        match result {
            Ok(suggestions) => all.extend(suggestions),
            Err(e) => warn!(doc_tag, error = %e, "AI mapping batch failed; falling back to fuzzy match for its columns"),
        }
    }
    all
}

/// Select the best saved template matching a raw Excel header list by
/// column-name overlap (spec §4.8 "saved template matched... overlap ≥
/// 80%"). Returns the matching template and its overlap ratio; the caller
/// is responsible for incrementing `usage_count` on the stored template.
pub fn best_template_match<'t>(
    excel_columns: &[String],
    templates: &'t [ExtractionTemplate],
) -> Option<(&'t ExtractionTemplate, f32)> {
    let incoming: HashSet<String> = excel_columns.iter().map(|c| normalize_field_name(c)).collect();
    if incoming.is_empty() {
        return None;
    }

    templates
        .iter()
        .filter(|t| !t.columns.is_empty())
        .map(|t| {
            let template_cols: HashSet<String> = t.columns.iter().map(|c| normalize_field_name(&c.excel_column)).collect();
            let overlap = template_cols.intersection(&incoming).count();
            (t, overlap as f32 / incoming.len() as f32)
        })
        .filter(|(_, ratio)| *ratio >= TEMPLATE_OVERLAP_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn field(name: &str, value: &str) -> ExtractedField {
        ExtractedField {
            document_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            field_name: name.to_string(),
            field_label: name.to_string(),
            field_type: crate::model::FieldType::Text,
            field_value: Some(value.to_string()),
            field_group: name.split('.').next().unwrap_or(name).to_string(),
            page_number: 1,
            field_order: 0,
            confidence_score: Some(0.9),
            needs_manual_review: false,
            extraction_method: "without_template_extraction".to_string(),
            model_version: "gpt-4.1-nano".to_string(),
            tokens_used: 10,
            processing_time_ms: 5,
        }
    }

    fn column(excel_column: &str) -> TemplateColumn {
        TemplateColumn {
            column_number: 1,
            excel_column: excel_column.to_string(),
            db_field_path: None,
            source_field: None,
            source_section: None,
            source_page: None,
            search_keywords: vec![],
            extraction_hint: None,
            example_value: None,
            data_type: None,
            post_process_type: None,
            post_process_config: None,
            default_value: None,
        }
    }

    fn template(columns: Vec<TemplateColumn>) -> ExtractionTemplate {
        ExtractionTemplate {
            template_id: Uuid::new_v4(),
            name: "t".to_string(),
            description: None,
            document_type: None,
            columns,
            usage_count: 0,
        }
    }

    #[tokio::test]
    async fn direct_path_resolves_at_high_confidence() {
        let mut col = column("Customer");
        col.db_field_path = Some("customer.name".to_string());
        let fields = vec![field("customer.name", "ACME")];
        let t = template(vec![col]);

        let results = resolve_mappings(&t, &fields, None, None, "doc").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_method, MatchMethod::DbFieldPathDirect);
        assert_eq!(results[0].db_field_name.as_deref(), Some("customer.name"));
        assert_eq!(results[0].extracted_value.as_deref(), Some("ACME"));
        assert!(results[0].confidence > 0.9);
    }

    #[tokio::test]
    async fn default_value_marks_sentinel() {
        let mut col = column("Default Currency");
        col.default_value = Some(String::new());
        let t = template(vec![col]);

        let results = resolve_mappings(&t, &[], None, None, "doc").await;
        assert_eq!(results[0].match_method, MatchMethod::DefaultValue);
        assert_eq!(results[0].db_field_name.as_deref(), Some(DEFAULT_SENTINEL));
        assert_eq!(results[0].default_value.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn keyword_search_matches_via_search_keywords() {
        let mut col = column("Total Due");
        col.search_keywords = vec!["total".to_string()];
        let fields = vec![field("invoice.total_amount", "123.45")];
        let t = template(vec![col]);

        let results = resolve_mappings(&t, &fields, None, None, "doc").await;
        assert_eq!(results[0].match_method, MatchMethod::KeywordSearch);
        assert_eq!(results[0].db_field_name.as_deref(), Some("invoice.total_amount"));
    }

    #[tokio::test]
    async fn no_llm_falls_through_to_fuzzy_or_unmapped() {
        let col = column("Customer Name");
        let fields = vec![field("customer.name", "ACME")];
        let t = template(vec![col]);

        let results = resolve_mappings(&t, &fields, None, None, "doc").await;
        assert_eq!(results[0].match_method, MatchMethod::FuzzyMatch);
        assert_eq!(results[0].db_field_name.as_deref(), Some("customer.name"));
    }

    #[tokio::test]
    async fn unrelated_column_is_unmapped() {
        let col = column("Zzz Unrelated Qqq");
        let fields = vec![field("customer.name", "ACME")];
        let t = template(vec![col]);

        let results = resolve_mappings(&t, &fields, None, None, "doc").await;
        assert_eq!(results[0].match_method, MatchMethod::Unmapped);
        assert!(results[0].db_field_name.is_none());
    }

    #[tokio::test]
    async fn mapping_order_matches_template_order() {
        let t = template(vec![column("A"), column("B"), column("C")]);
        let results = resolve_mappings(&t, &[], None, None, "doc").await;
        let names: Vec<&str> = results.iter().map(|r| r.excel_column.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn best_template_match_requires_high_overlap() {
        let templates = vec![template(vec![column("A"), column("B"), column("C"), column("D"), column("E")])];
        let high_overlap = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
        assert!(best_template_match(&high_overlap, &templates).is_some());

        let low_overlap = vec!["A".to_string(), "Zzz".to_string(), "Yyy".to_string(), "Xxx".to_string()];
        assert!(best_template_match(&low_overlap, &templates).is_none());
    }

    #[test]
    fn normalize_strips_non_alpha_and_lowercases() {
        assert_eq!(normalize_field_name("Invoice_No. 2"), "invoiceno");
    }

    #[test]
    fn keyword_overlap_uses_excel_column_words_without_search_keywords() {
        let col = column("Total Amount");
        assert_eq!(keyword_overlap(&col, "total_amount"), 1.0);
        assert_eq!(keyword_overlap(&col, "invoice.total_amount"), 0.5);
        assert_eq!(keyword_overlap(&col, "customer.name"), 0.0);
    }
}
