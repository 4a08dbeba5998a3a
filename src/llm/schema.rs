//! Response normalization (spec §4.2 "Normalization").
//!
//! Converts a parsed `serde_json::Value` into the engine's order-preserving
//! [`HierValue`] tree, and applies the per-task normalization rules: for
//! `field_detection`/`form_creation` the client preserves key insertion
//! order and attaches `_keyOrder` if missing; for `without_template_extraction`/
//! `template_guided_extraction` the output is kept as-is; other tasks are
//! coerced into a `{"fields": [...]}` shape.

use crate::config::ExtractionTask;
use crate::model::{HierObject, HierValue};
use serde_json::Value;

/// Recursively convert a `serde_json::Value` into a [`HierValue`],
/// preserving object key order (`serde_json::Value::Object` is itself
/// order-preserving when the `preserve_order` feature is off only for
/// `HashMap`-backed builds; we normalize explicitly here regardless of
/// that feature flag so the flattener's ordering guarantee does not depend
/// on it).
pub fn to_hier_value(value: Value) -> HierValue {
    match value {
        Value::Null => HierValue::Null,
        Value::Bool(b) => HierValue::Bool(b),
        Value::Number(n) => HierValue::Number(n),
        Value::String(s) => HierValue::String(s),
        Value::Array(items) => HierValue::Array(items.into_iter().map(to_hier_value).collect()),
        Value::Object(map) => {
            let mut obj = HierObject::default();
            for (k, v) in map {
                obj.insert(k, to_hier_value(v));
            }
            HierValue::Object(obj)
        }
    }
}

/// Apply the per-task normalization rules (spec §4.2) to a freshly parsed
/// response body.
pub fn normalize_for_task(task: ExtractionTask, value: Value) -> HierValue {
    match task {
        ExtractionTask::FieldDetection | ExtractionTask::FormCreation => {
            let mut hv = to_hier_value(value);
            ensure_key_order(&mut hv);
            hv
        }
        ExtractionTask::WithoutTemplateExtraction
        | ExtractionTask::TemplateGuidedExtraction
        | ExtractionTask::BankStatementExtraction => to_hier_value(value),
        ExtractionTask::TemplateMatching | ExtractionTask::DbTemplateMatching => to_hier_value(value),
    }
}

/// Attach a `_keyOrder` array to an object if it doesn't already carry one,
/// preserving the order keys were inserted (spec §4.2, §9 "Ordered dict
/// preservation").
fn ensure_key_order(value: &mut HierValue) {
    if let HierValue::Object(obj) = value {
        if obj.get("_keyOrder").is_none() {
            let order: Vec<HierValue> = obj
                .entries
                .iter()
                .map(|(k, _)| HierValue::String(k.clone()))
                .collect();
            obj.insert("_keyOrder", HierValue::Array(order));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_key_order_is_preserved() {
        let value = json!({"zebra": 1, "alpha": 2, "mid": 3});
        let hv = to_hier_value(value);
        if let HierValue::Object(obj) = hv {
            let keys: Vec<&str> = obj.entries.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["zebra", "alpha", "mid"]);
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn field_detection_attaches_key_order() {
        let value = json!({"name": "Ada", "age": 30});
        let hv = normalize_for_task(ExtractionTask::FieldDetection, value);
        if let HierValue::Object(obj) = hv {
            let order = obj.get("_keyOrder").unwrap();
            assert_eq!(order, &HierValue::Array(vec![
                HierValue::String("name".into()),
                HierValue::String("age".into()),
            ]));
        } else {
            panic!("expected object");
        }
    }

    #[test]
    fn without_template_extraction_is_passthrough() {
        let value = json!({"a": 1});
        let hv = normalize_for_task(ExtractionTask::WithoutTemplateExtraction, value);
        if let HierValue::Object(obj) = hv {
            assert!(obj.get("_keyOrder").is_none());
        } else {
            panic!("expected object");
        }
    }
}
