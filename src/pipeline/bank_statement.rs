//! Bank-statement table-header carry-over (spec §4.5 "bank statements must
//! complete page 1 before continuation pages can be submitted with
//! `table_headers` context").

use crate::model::HierValue;

/// Pull the `_table_headers` array a first/detection page emitted, if any.
pub fn extract_table_headers(value: &HierValue) -> Option<Vec<String>> {
    let HierValue::Object(obj) = value else { return None };
    let HierValue::Array(items) = obj.get("_table_headers")? else { return None };
    let headers: Vec<String> = items
        .iter()
        .filter_map(|v| match v {
            HierValue::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    (!headers.is_empty()).then_some(headers)
}

pub fn is_bank_statement(
    task: crate::config::ExtractionTask,
    document_type: Option<&str>,
) -> bool {
    task == crate::config::ExtractionTask::BankStatementExtraction || document_type == Some("bank_statement")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HierObject;

    #[test]
    fn extracts_string_headers() {
        let mut obj = HierObject::default();
        obj.insert(
            "_table_headers",
            HierValue::Array(vec![
                HierValue::String("Date".into()),
                HierValue::String("Amount".into()),
            ]),
        );
        let headers = extract_table_headers(&HierValue::Object(obj)).unwrap();
        assert_eq!(headers, vec!["Date", "Amount"]);
    }

    #[test]
    fn missing_key_returns_none() {
        let obj = HierObject::default();
        assert!(extract_table_headers(&HierValue::Object(obj)).is_none());
    }

    #[test]
    fn empty_array_returns_none() {
        let mut obj = HierObject::default();
        obj.insert("_table_headers", HierValue::Array(vec![]));
        assert!(extract_table_headers(&HierValue::Object(obj)).is_none());
    }
}
