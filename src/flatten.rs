//! Field Flattener (C6, spec §4.6).
//!
//! Walks a page's `hierarchical_data` tree and produces an ordered list of
//! typed, dotted/indexed field rows. Not present in the teacher (which only
//! ever emitted one Markdown string per page); grounded in
//! `bulk_insert_service.py`'s `_prepare_records`, reimplemented here as a
//! pure walk over [`HierValue`] instead of a duck-typed Python dict.

use crate::model::{ExtractedField, FieldType, HierValue, PageResult};
use uuid::Uuid;

/// One flattened leaf, prior to being stamped with document-level identity
/// (`document_id`, `job_id`, `field_order`, timing/usage) by
/// [`flatten_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlatLeaf {
    pub path: String,
    pub field_type: FieldType,
    pub value: Option<String>,
    pub field_group: String,
    pub confidence: Option<f32>,
}

/// Flatten a single page's hierarchical data (spec §4.6). Pure: callers
/// thread page number, document identity, and the field-order counter.
pub fn flatten_value(value: &HierValue) -> Vec<FlatLeaf> {
    let mut out = Vec::new();
    walk(value, "", 0, "root", None, &mut out);
    out
}

fn walk(
    value: &HierValue,
    path: &str,
    depth: usize,
    group: &str,
    force_type: Option<FieldType>,
    out: &mut Vec<FlatLeaf>,
) {
    match value {
        HierValue::Object(obj) => {
            if let Some((tag, inner)) = obj.as_typed_leaf() {
                if tag == "table" {
                    flatten_table(inner, path, out);
                } else {
                    let forced = field_type_from_tag(tag);
                    let confidence = as_f32(obj.get("confidence"));
                    walk_leaf(inner, path, group, Some(forced), confidence, out);
                }
            } else {
                for (i, (key, child)) in obj.entries.iter().enumerate() {
                    if key.starts_with('_') {
                        continue;
                    }
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    let child_group = if depth == 0 { key.as_str() } else { group };
                    let _ = i;
                    walk(child, &child_path, depth + 1, child_group, force_type, out);
                }
            }
        }
        HierValue::Array(items) => {
            if items.is_empty() {
                out.push(FlatLeaf {
                    path: path.to_string(),
                    field_type: FieldType::Array,
                    value: Some("[]".to_string()),
                    field_group: group.to_string(),
                    confidence: None,
                });
            } else {
                for (i, item) in items.iter().enumerate() {
                    let child_path = format!("{path}[{i}]");
                    walk(item, &child_path, depth + 1, group, force_type, out);
                }
            }
        }
        primitive => walk_leaf(primitive, path, group, force_type, None, out),
    }
}

/// Handle a value already known not to be a dict/list-of-rows: either a
/// genuine primitive, or the `value` payload of a typed-leaf wrapper (which
/// may itself recurse into an object/array, e.g. `{"_type": "address",
/// "value": {"street": ..., "city": ...}}`).
fn walk_leaf(
    value: &HierValue,
    path: &str,
    group: &str,
    force_type: Option<FieldType>,
    confidence: Option<f32>,
    out: &mut Vec<FlatLeaf>,
) {
    match value {
        HierValue::Object(_) | HierValue::Array(_) => {
            walk(value, path, 1, group, force_type, out);
        }
        primitive => {
            let (inferred_type, stringified) = stringify_primitive(primitive);
            out.push(FlatLeaf {
                path: path.to_string(),
                field_type: force_type.unwrap_or(inferred_type),
                value: stringified,
                field_group: group.to_string(),
                confidence,
            });
        }
    }
}

/// Rows of a `{"_type": "table", "value": [...]}` wrapper: each row is
/// flattened with its leaves forced to `table_cell` (spec §4.6).
fn flatten_table(value: &HierValue, path: &str, out: &mut Vec<FlatLeaf>) {
    let HierValue::Array(rows) = value else { return };
    for (i, row) in rows.iter().enumerate() {
        let row_path = format!("{path}[{i}]");
        let group = path.split(['.', '[']).next().unwrap_or("root").to_string();
        walk(row, &row_path, 1, &group, Some(FieldType::TableCell), out);
    }
}

fn field_type_from_tag(tag: &str) -> FieldType {
    match tag {
        "integer" => FieldType::Integer,
        "number" => FieldType::Number,
        "boolean" => FieldType::Boolean,
        "null" => FieldType::Null,
        "array" => FieldType::Array,
        "table_cell" => FieldType::TableCell,
        "date" => FieldType::Date,
        "currency" => FieldType::Currency,
        _ => FieldType::Text,
    }
}

fn stringify_primitive(value: &HierValue) -> (FieldType, Option<String>) {
    match value {
        HierValue::Null => (FieldType::Null, None),
        HierValue::Bool(b) => (FieldType::Boolean, Some(b.to_string())),
        HierValue::Number(n) => {
            let ty = if n.is_i64() || n.is_u64() {
                FieldType::Integer
            } else {
                FieldType::Number
            };
            (ty, Some(n.to_string()))
        }
        HierValue::String(s) => (FieldType::Text, Some(s.clone())),
        HierValue::Array(_) | HierValue::Object(_) => (FieldType::Text, None),
    }
}

fn as_f32(value: Option<&HierValue>) -> Option<f32> {
    match value {
        Some(HierValue::Number(n)) => n.as_f64().map(|f| f as f32),
        _ => None,
    }
}

/// Title-cased, space-and-`>`-delimited rendering of a field path, e.g.
/// `customer.addresses[2].city` → `Customer > Addresses > City` (spec §4.6).
pub fn field_label(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            let name = match segment.find('[') {
                Some(idx) => &segment[..idx],
                None => segment,
            };
            title_case(name)
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" > ")
}

fn title_case(s: &str) -> String {
    s.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Flatten every page of a document into ordered [`ExtractedField`] rows.
/// `field_order` is a single monotonic counter across the whole document,
/// not reset per page (spec §4.6, §8 property 2); `pages` must already be
/// in page order.
pub fn flatten_document(
    pages: &[PageResult],
    job_id: Uuid,
    model_version: &str,
    extraction_method: &str,
) -> Vec<ExtractedField> {
    let mut fields = Vec::new();
    let mut counter: u64 = 0;

    for page in pages {
        let Some(hv) = &page.hierarchical_data else { continue };
        for leaf in flatten_value(hv) {
            fields.push(ExtractedField {
                document_id: page.document_id,
                job_id,
                field_name: leaf.path.clone(),
                field_label: field_label(&leaf.path),
                field_type: leaf.field_type,
                field_value: leaf.value,
                field_group: leaf.field_group,
                page_number: page.page_number,
                field_order: counter,
                confidence_score: leaf.confidence,
                needs_manual_review: ExtractedField::compute_needs_review(leaf.confidence),
                extraction_method: extraction_method.to_string(),
                model_version: model_version.to_string(),
                tokens_used: page.token_usage.total(),
                processing_time_ms: page.duration_ms,
            });
            counter += 1;
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::model::{ContentType, HierObject, TokenUsage};

    fn obj(pairs: Vec<(&str, HierValue)>) -> HierValue {
        let mut o = HierObject::default();
        for (k, v) in pairs {
            o.insert(k, v);
        }
        HierValue::Object(o)
    }

    #[test]
    fn flattens_nested_dict_with_group() {
        let value = obj(vec![(
            "customer",
            obj(vec![("name", HierValue::String("ACME".into()))]),
        )]);
        let leaves = flatten_value(&value);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, "customer.name");
        assert_eq!(leaves[0].field_group, "customer");
        assert_eq!(leaves[0].value.as_deref(), Some("ACME"));
        assert_eq!(leaves[0].field_type, FieldType::Text);
    }

    #[test]
    fn skips_underscore_keys() {
        let value = obj(vec![
            ("_keyOrder", HierValue::Array(vec![])),
            ("name", HierValue::String("Ada".into())),
        ]);
        let leaves = flatten_value(&value);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, "name");
    }

    #[test]
    fn typed_leaf_wrapper_sets_type() {
        let value = obj(vec![(
            "invoice",
            obj(vec![(
                "total",
                obj(vec![
                    ("_type", HierValue::String("currency".into())),
                    ("value", HierValue::String("123.45".into())),
                ]),
            )]),
        )]);
        let leaves = flatten_value(&value);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].path, "invoice.total");
        assert_eq!(leaves[0].field_type, FieldType::Currency);
        assert_eq!(leaves[0].value.as_deref(), Some("123.45"));
    }

    #[test]
    fn empty_list_is_one_array_field() {
        let value = obj(vec![("items", HierValue::Array(vec![]))]);
        let leaves = flatten_value(&value);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].field_type, FieldType::Array);
        assert_eq!(leaves[0].value.as_deref(), Some("[]"));
    }

    #[test]
    fn non_empty_list_indexes_elements() {
        let value = obj(vec![(
            "shareholders",
            HierValue::Array(vec![
                obj(vec![("name", HierValue::String("A".into()))]),
                obj(vec![("name", HierValue::String("B".into()))]),
            ]),
        )]);
        let leaves = flatten_value(&value);
        let paths: Vec<&str> = leaves.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["shareholders[0].name", "shareholders[1].name"]);
    }

    #[test]
    fn table_rows_become_table_cells() {
        let value = obj(vec![(
            "transactions",
            obj(vec![
                ("_type", HierValue::String("table".into())),
                (
                    "value",
                    HierValue::Array(vec![obj(vec![
                        ("date", HierValue::String("2024-01-01".into())),
                        ("amount", HierValue::String("10.00".into())),
                    ])]),
                ),
            ]),
        )]);
        let leaves = flatten_value(&value);
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().all(|l| l.field_type == FieldType::TableCell));
        let paths: Vec<&str> = leaves.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["transactions[0].date", "transactions[0].amount"]);
    }

    #[test]
    fn null_values_are_typed_null() {
        let value = obj(vec![("missing", HierValue::Null)]);
        let leaves = flatten_value(&value);
        assert_eq!(leaves[0].field_type, FieldType::Null);
        assert_eq!(leaves[0].value, None);
    }

    #[test]
    fn field_label_formats_path() {
        assert_eq!(field_label("customer.addresses[2].city"), "Customer > Addresses > City");
        assert_eq!(field_label("table[0].amount"), "Table > Amount");
        assert_eq!(field_label("account_holder"), "Account Holder");
    }

    #[test]
    fn field_order_is_monotonic_across_pages() {
        let page1 = PageResult {
            document_id: Uuid::new_v4(),
            page_number: 1,
            content_type: ContentType::Text,
            hierarchical_data: Some(obj(vec![("a", HierValue::String("1".into()))])),
            signatures: vec![],
            faces: vec![],
            token_usage: TokenUsage::default(),
            finish_reason: None,
            duration_ms: 0,
            retries: 0,
            error: None,
        };
        let mut page2 = page1.clone();
        page2.page_number = 2;
        page2.hierarchical_data = Some(obj(vec![
            ("b", HierValue::String("2".into())),
            ("c", HierValue::String("3".into())),
        ]));

        let fields = flatten_document(&[page1, page2], Uuid::new_v4(), "gpt-4.1-nano", "without_template_extraction");
        let orders: Vec<u64> = fields.iter().map(|f| f.field_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(fields[1].page_number, 2);
    }

    #[test]
    fn failed_page_contributes_no_fields() {
        let page = PageResult {
            document_id: Uuid::new_v4(),
            page_number: 1,
            content_type: ContentType::Text,
            hierarchical_data: None,
            signatures: vec![],
            faces: vec![],
            token_usage: TokenUsage::default(),
            finish_reason: None,
            duration_ms: 0,
            retries: 1,
            error: Some(StageError::RenderFailed { page: 1, detail: "x".into() }),
        };
        let fields = flatten_document(&[page], Uuid::new_v4(), "gpt-4.1-nano", "without_template_extraction");
        assert!(fields.is_empty());
    }
}
