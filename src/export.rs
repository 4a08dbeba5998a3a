//! Export Engine (C9, spec §4.9).
//!
//! Not present in the teacher (it has no spreadsheet output at all).
//! Grounded in `template_mapping_service.py`'s `export_mapped_data`: the
//! single-row AI-preview shortcut, the 4-level field-name fallback, and the
//! data-driven `[N]` array-expansion pass are all reimplemented here as pure
//! functions over already-loaded data, with `rust_xlsxwriter`/`csv` doing the
//! actual sheet/file writing the way the pack's document-conversion crates
//! use them.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use rust_xlsxwriter::Workbook;
use uuid::Uuid;

use crate::error::EngineError;
use crate::mapping::normalize_field_name;
use crate::model::{ExtractedField, MappingResult, TemplateColumn};
use crate::postprocess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

/// Request shape for an export run (spec §4.9 inputs). `columns` and
/// `mappings` must be the same length and in the same order (the order
/// [`crate::mapping::resolve_mappings`] guarantees), since a column's
/// post-process configuration lives on [`TemplateColumn`] while its
/// resolution lives on the matching [`MappingResult`].
pub struct ExportRequest<'a> {
    pub job_id: Uuid,
    pub columns: &'a [TemplateColumn],
    pub mappings: &'a [MappingResult],
    pub format: ExportFormat,
}

/// Column header, in mapping/template order (spec §4.9 step 7, "header row
/// = mapping order").
pub fn header(columns: &[TemplateColumn]) -> Vec<String> {
    columns.iter().map(|c| c.excel_column.clone()).collect()
}

/// Resolve the export value for one (column, mapping) pair, independent of
/// which document (or none, for the AI-preview path) it came from.
///
/// `default_value` set on the mapping forces the literal cell value
/// unconditionally — it is checked before any lookup or post-processing, so
/// a configured default always wins even over an AI-extracted value or a
/// DB-path field match (spec §4.9 step 6, "column closure").
fn resolve_cell(col: &TemplateColumn, mapping: &MappingResult, raw: Option<&str>) -> String {
    if let Some(default) = &mapping.default_value {
        return default.clone();
    }
    let Some(raw) = raw else { return String::new() };
    postprocess::apply(col.post_process_type.as_deref(), col.post_process_config.as_ref(), raw)
}

/// Build the single AI-preview row directly from each mapping's
/// `extracted_value` (spec §4.9 step 2, "skip the DB path entirely").
fn build_ai_preview_row(columns: &[TemplateColumn], mappings: &[MappingResult]) -> Vec<String> {
    columns
        .iter()
        .zip(mappings)
        .map(|(col, mapping)| resolve_cell(col, mapping, mapping.extracted_value.as_deref()))
        .collect()
}

struct IndexedName {
    prefix: String,
    suffix: Option<String>,
}

fn indexed_name_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<prefix>.+)\[(?P<idx>\d+)\](?P<suffix>\..+)?$").unwrap())
}

fn parse_indexed(name: &str) -> Option<(IndexedName, usize)> {
    let caps = indexed_name_regex().captures(name)?;
    let prefix = caps.name("prefix")?.as_str().to_string();
    let idx: usize = caps.name("idx")?.as_str().parse().ok()?;
    let suffix = caps.name("suffix").map(|m| m.as_str().to_string());
    Some((IndexedName { prefix, suffix }, idx))
}

fn substitute_index(pattern: &IndexedName, idx: usize) -> String {
    format!("{}[{}]{}", pattern.prefix, idx, pattern.suffix.as_deref().unwrap_or(""))
}

/// Every distinct array index present in `fields` for `prefix` (spec §4.9
/// step 5, "group the document's fields by `{prefix}[i]`").
fn discover_indices(fields: &[ExtractedField], prefix: &str) -> Vec<usize> {
    let re = match Regex::new(&format!(r"^{}\[(\d+)\]", regex::escape(prefix))) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let mut indices: BTreeSet<usize> = BTreeSet::new();
    for f in fields {
        if let Some(caps) = re.captures(&f.field_name) {
            if let Ok(i) = caps[1].parse() {
                indices.insert(i);
            }
        }
    }
    indices.into_iter().collect()
}

/// 4-level field-name fallback used by the DB path (spec §4.9 step 4):
/// exact match, normalized match, key-part match (suffix after the last
/// `.`), then suffix-endswith on any field name.
fn lookup_field<'a>(fields: &'a [ExtractedField], name: &str) -> Option<&'a ExtractedField> {
    if let Some(f) = fields.iter().find(|f| f.field_name == name) {
        return Some(f);
    }

    let normalized_target = normalize_field_name(name);
    if let Some(f) = fields.iter().find(|f| normalize_field_name(&f.field_name) == normalized_target) {
        return Some(f);
    }

    let key_part = name.rsplit('.').next().unwrap_or(name);
    if let Some(f) = fields.iter().find(|f| f.field_name.rsplit('.').next() == Some(key_part)) {
        return Some(f);
    }

    fields.iter().find(|f| f.field_name.ends_with(name) || name.ends_with(f.field_name.as_str()))
}

/// Build the rows for one document on the DB path, expanding into multiple
/// rows when any mapping's resolved field name carries an array index
/// (spec §4.9 step 5). Falls back to a single row (no substitution) when no
/// mapping is indexed, or when the document itself has no matching indices.
fn build_document_rows(columns: &[TemplateColumn], mappings: &[MappingResult], fields: &[ExtractedField]) -> Vec<Vec<String>> {
    let array_mapping = mappings.iter().find_map(|m| {
        let name = m.db_field_name.as_deref()?;
        parse_indexed(name).map(|(pattern, _)| pattern)
    });

    let indices = array_mapping.as_ref().map(|p| discover_indices(fields, &p.prefix)).unwrap_or_default();

    if indices.is_empty() {
        return vec![build_row_for_index(columns, mappings, fields, None)];
    }

    indices.into_iter().map(|idx| build_row_for_index(columns, mappings, fields, Some(idx))).collect()
}

fn build_row_for_index(
    columns: &[TemplateColumn],
    mappings: &[MappingResult],
    fields: &[ExtractedField],
    row_index: Option<usize>,
) -> Vec<String> {
    columns
        .iter()
        .zip(mappings)
        .map(|(col, mapping)| {
            if mapping.default_value.is_some() {
                return resolve_cell(col, mapping, None);
            }
            let Some(name) = &mapping.db_field_name else {
                return resolve_cell(col, mapping, None);
            };

            let effective_name = match (row_index, parse_indexed(name)) {
                (Some(idx), Some((pattern, _))) => substitute_index(&pattern, idx),
                _ => name.clone(),
            };

            let value = lookup_field(fields, &effective_name).and_then(|f| f.field_value.as_deref());
            resolve_cell(col, mapping, value)
        })
        .collect()
}

/// Build every export row (spec §4.9 steps 2-6). `fields_by_document`
/// drives the DB path; it is ignored when any mapping already carries an
/// `extracted_value` (the AI-preview path emits exactly one row).
pub fn build_rows(
    columns: &[TemplateColumn],
    mappings: &[MappingResult],
    fields_by_document: &BTreeMap<Uuid, Vec<ExtractedField>>,
) -> Vec<Vec<String>> {
    if mappings.iter().any(|m| m.extracted_value.is_some()) {
        return vec![build_ai_preview_row(columns, mappings)];
    }

    fields_by_document
        .values()
        .flat_map(|fields| build_document_rows(columns, mappings, fields))
        .collect()
}

/// Serialize a header + row set as RFC 4180 CSV (spec §4.9 step 7).
pub fn write_csv(header: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>, EngineError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(header).map_err(|e| EngineError::Internal(e.to_string()))?;
    for row in rows {
        writer.write_record(row).map_err(|e| EngineError::Internal(e.to_string()))?;
    }
    writer.into_inner().map_err(|e| EngineError::Internal(e.to_string()))
}

/// Serialize a header + row set as a single-sheet XLSX workbook (spec §4.9
/// step 7).
pub fn write_xlsx(header: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>, EngineError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col_idx, name) in header.iter().enumerate() {
        sheet
            .write_string(0, col_idx as u16, name)
            .map_err(|e| EngineError::XlsxError(e.to_string()))?;
    }

    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            sheet
                .write_string((row_idx + 1) as u32, col_idx as u16, value)
                .map_err(|e| EngineError::XlsxError(e.to_string()))?;
        }
    }

    workbook.save_to_buffer().map_err(|e| EngineError::XlsxError(e.to_string()))
}

/// Run a full export: build rows, then serialize to the requested format
/// (spec §4.9, the whole pipeline).
pub fn export(request: &ExportRequest<'_>, fields_by_document: &BTreeMap<Uuid, Vec<ExtractedField>>) -> Result<Vec<u8>, EngineError> {
    let header = header(request.columns);
    let rows = build_rows(request.columns, request.mappings, fields_by_document);
    match request.format {
        ExportFormat::Csv => write_csv(&header, &rows),
        ExportFormat::Xlsx => write_xlsx(&header, &rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldType, MatchMethod};

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

    fn mapping(excel_column: &str, db_field_name: Option<&str>) -> MappingResult {
        MappingResult {
            excel_column: excel_column.to_string(),
            db_field_name: db_field_name.map(|s| s.to_string()),
            confidence: 0.9,
            source_location: None,
            match_method: MatchMethod::DbFieldPathDirect,
            extracted_value: None,
            default_value: None,
        }
    }

    fn field(document_id: Uuid, name: &str, value: &str) -> ExtractedField {
        ExtractedField {
            document_id,
            job_id: Uuid::new_v4(),
            field_name: name.to_string(),
            field_label: name.to_string(),
            field_type: FieldType::Text,
            field_value: Some(value.to_string()),
            field_group: name.split('.').next().unwrap_or(name).to_string(),
            page_number: 1,
            field_order: 0,
            confidence_score: Some(0.9),
            needs_manual_review: false,
            extraction_method: "without_template_extraction".to_string(),
            model_version: "gpt-4.1-nano".to_string(),
            tokens_used: 0,
            processing_time_ms: 0,
        }
    }

    #[test]
    fn ai_preview_path_emits_single_row_from_extracted_value() {
        let columns = vec![column("Customer")];
        let mut m = mapping("Customer", Some("customer.name"));
        m.extracted_value = Some("ACME".to_string());
        let mappings = vec![m];

        let rows = build_rows(&columns, &mappings, &BTreeMap::new());
        assert_eq!(rows, vec![vec!["ACME".to_string()]]);
    }

    #[test]
    fn default_value_forces_cell_even_over_lookup() {
        let columns = vec![column("Currency")];
        let mut m = mapping("Currency", Some("invoice.currency"));
        m.default_value = Some("USD".to_string());
        let mappings = vec![m];

        let doc_id = Uuid::new_v4();
        let mut fields_by_document = BTreeMap::new();
        fields_by_document.insert(doc_id, vec![field(doc_id, "invoice.currency", "EUR")]);

        let rows = build_rows(&columns, &mappings, &fields_by_document);
        assert_eq!(rows, vec![vec!["USD".to_string()]]);
    }

    #[test]
    fn db_path_looks_up_by_fallback_and_applies_postprocess() {
        let mut col = column("Paid");
        col.post_process_type = Some("yes_no".to_string());
        let columns = vec![col];
        let mappings = vec![mapping("Paid", Some("invoice.is_paid"))];

        let doc_id = Uuid::new_v4();
        let mut fields_by_document = BTreeMap::new();
        fields_by_document.insert(doc_id, vec![field(doc_id, "invoice.is_paid", "true")]);

        let rows = build_rows(&columns, &mappings, &fields_by_document);
        assert_eq!(rows, vec![vec!["Y".to_string()]]);
    }

    #[test]
    fn array_expansion_produces_one_row_per_index() {
        let columns = vec![column("Description"), column("Customer")];
        let mappings = vec![mapping("Description", Some("items[0].description")), mapping("Customer", Some("customer.name"))];

        let doc_id = Uuid::new_v4();
        let fields = vec![
            field(doc_id, "items[0].description", "Widget"),
            field(doc_id, "items[1].description", "Gadget"),
            field(doc_id, "customer.name", "ACME"),
        ];
        let mut fields_by_document = BTreeMap::new();
        fields_by_document.insert(doc_id, fields);

        let mut rows = build_rows(&columns, &mappings, &fields_by_document);
        rows.sort();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&vec!["Widget".to_string(), "ACME".to_string()]));
        assert!(rows.contains(&vec!["Gadget".to_string(), "ACME".to_string()]));
    }

    #[test]
    fn no_array_mapping_yields_single_row_per_document() {
        let columns = vec![column("Customer")];
        let mappings = vec![mapping("Customer", Some("customer.name"))];

        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let mut fields_by_document = BTreeMap::new();
        fields_by_document.insert(doc_a, vec![field(doc_a, "customer.name", "ACME")]);
        fields_by_document.insert(doc_b, vec![field(doc_b, "customer.name", "Globex")]);

        let rows = build_rows(&columns, &mappings, &fields_by_document);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn csv_output_has_header_and_rows() {
        let header = vec!["A".to_string(), "B".to_string()];
        let rows = vec![vec!["1".to_string(), "2".to_string()]];
        let bytes = write_csv(&header, &rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("A,B"));
        assert!(text.contains("1,2"));
    }

    #[test]
    fn missing_field_resolves_to_empty_string() {
        let columns = vec![column("Ghost")];
        let mappings = vec![mapping("Ghost", Some("nonexistent.path"))];
        let doc_id = Uuid::new_v4();
        let mut fields_by_document = BTreeMap::new();
        fields_by_document.insert(doc_id, vec![field(doc_id, "customer.name", "ACME")]);

        let rows = build_rows(&columns, &mappings, &fields_by_document);
        assert_eq!(rows, vec![vec![String::new()]]);
    }
}
