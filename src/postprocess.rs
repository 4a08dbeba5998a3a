//! Post-Processor (C10, spec §4.10).
//!
//! Six pure value transforms applied by the export engine after a column's
//! value has been resolved. Grounded in `template_mapping_service.py`'s
//! post-processing branches inside `export_mapped_data`; each transform
//! here is `(value, config) -> value` rather than an inline `if` chain, so
//! the export engine's resolver logic doesn't need to know the transform
//! set. A transform that fails (bad date, unknown type) returns the
//! original value unchanged.

use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use tracing::warn;

/// Apply the named transform to `value`, or return `value` unchanged if
/// `post_process_type` is `None`, unrecognized, or the transform fails.
pub fn apply(post_process_type: Option<&str>, config: Option<&Value>, value: &str) -> String {
    let Some(ty) = post_process_type else {
        return value.to_string();
    };

    let transformed = match ty {
        "yes_no" => Some(yes_no(value)),
        "split_first" => split_first(value, config),
        "split_second" => split_second(value, config),
        "calculate_years" => calculate_years(value, config),
        "date_format" => date_format(value, config),
        "currency_format" => Some(currency_format(value)),
        other => {
            warn!(post_process_type = other, "unknown post-process type; value passed through unchanged");
            None
        }
    };

    transformed.unwrap_or_else(|| value.to_string())
}

fn yes_no(value: &str) -> String {
    let truthy = matches!(value.trim().to_lowercase().as_str(), "true" | "yes" | "y" | "1");
    if truthy { "Y".to_string() } else { "N".to_string() }
}

fn separator(config: Option<&Value>) -> String {
    config
        .and_then(|c| c.get("separator"))
        .and_then(|v| v.as_str())
        .unwrap_or(",")
        .to_string()
}

fn split_first(value: &str, config: Option<&Value>) -> Option<String> {
    let sep = separator(config);
    value.split_once(sep.as_str()).map(|(a, _)| a.trim().to_string())
}

fn split_second(value: &str, config: Option<&Value>) -> Option<String> {
    let sep = separator(config);
    value.split_once(sep.as_str()).map(|(_, b)| b.trim().to_string())
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%d %b %Y",
];

fn parse_any_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

fn calculate_years(value: &str, config: Option<&Value>) -> Option<String> {
    let date = parse_any_date(value)?;
    let anchor_year = config
        .and_then(|c| c.get("anchor_year"))
        .and_then(|v| v.as_i64())
        .map(|y| y as i32)
        .unwrap_or_else(|| chrono::Utc::now().year());
    Some((anchor_year - date.year()).to_string())
}

fn date_format(value: &str, config: Option<&Value>) -> Option<String> {
    let date = parse_any_date(value)?;
    let out_fmt = config.and_then(|c| c.get("format")).and_then(|v| v.as_str()).unwrap_or("%Y-%m-%d");
    Some(date.format(out_fmt).to_string())
}

fn currency_format(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() { value.to_string() } else { cleaned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn yes_no_maps_truthy_values() {
        assert_eq!(apply(Some("yes_no"), None, "true"), "Y");
        assert_eq!(apply(Some("yes_no"), None, "Yes"), "Y");
        assert_eq!(apply(Some("yes_no"), None, "0"), "N");
        assert_eq!(apply(Some("yes_no"), None, "nope"), "N");
    }

    #[test]
    fn split_first_and_second_use_configured_separator() {
        let cfg = json!({"separator": "|"});
        assert_eq!(apply(Some("split_first"), Some(&cfg), "A|B"), "A");
        assert_eq!(apply(Some("split_second"), Some(&cfg), "A|B"), "B");
    }

    #[test]
    fn split_defaults_to_comma() {
        assert_eq!(apply(Some("split_first"), None, "Smith, John"), "Smith");
        assert_eq!(apply(Some("split_second"), None, "Smith, John"), "John");
    }

    #[test]
    fn calculate_years_uses_anchor_year() {
        let cfg = json!({"anchor_year": 2024});
        assert_eq!(apply(Some("calculate_years"), Some(&cfg), "2000-01-01"), "24");
    }

    #[test]
    fn date_format_reformats_recognized_pattern() {
        let cfg = json!({"format": "%d/%m/%Y"});
        assert_eq!(apply(Some("date_format"), Some(&cfg), "2024-03-05"), "05/03/2024");
    }

    #[test]
    fn invalid_date_passes_through_unchanged() {
        assert_eq!(apply(Some("date_format"), None, "not-a-date"), "not-a-date");
        assert_eq!(apply(Some("calculate_years"), None, "not-a-date"), "not-a-date");
    }

    #[test]
    fn currency_format_strips_symbols_and_separators() {
        assert_eq!(apply(Some("currency_format"), None, "$1,234.56"), "1234.56");
        assert_eq!(apply(Some("currency_format"), None, "-€42"), "-42");
    }

    #[test]
    fn unknown_type_passes_through_unchanged() {
        assert_eq!(apply(Some("reverse_string"), None, "abc"), "abc");
    }

    #[test]
    fn no_type_passes_through_unchanged() {
        assert_eq!(apply(None, None, "abc"), "abc");
    }
}
