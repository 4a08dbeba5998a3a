//! Ordered JSON repair pipeline (spec §4.2).
//!
//! Grounded in `original_source/.../llm_client.py`'s `_sanitize_json_content`
//! / `_extract_json_from_markdown` / `_complete_truncated_json`, reimagined
//! per design note #7 (spec §9) as a simple fold over fallible repair
//! strategies rather than exception-driven control flow: each strategy is a
//! pure function `&str -> Option<String>`, applied at most once, in order,
//! only when the previous attempt still fails to parse.

use serde_json::Value;

/// One repair strategy in the ordered pipeline.
type Strategy = fn(&str) -> Option<String>;

const STRATEGIES: &[Strategy] = &[
    decode_unicode_escapes,
    repair_unescaped_control_chars,
    strip_trailing_commas,
    quote_unquoted_keys,
    extract_from_fenced_block,
    complete_truncated_json,
];

/// Attempt to parse `raw` as JSON, applying the ordered repair pipeline on
/// failure. Returns the parsed value and how many repair strategies were
/// needed (0 means the input was already valid JSON).
pub fn repair_and_parse(raw: &str) -> Result<(Value, usize), String> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Ok((v, 0));
    }

    let mut candidate = raw.to_string();
    for (i, strategy) in STRATEGIES.iter().enumerate() {
        if let Some(repaired) = strategy(&candidate) {
            candidate = repaired;
            if let Ok(v) = serde_json::from_str::<Value>(&candidate) {
                return Ok((v, i + 1));
            }
        }
    }

    Err(format!("exhausted all {} repair strategies", STRATEGIES.len()))
}

/// (a) Decode literal `\uXXXX` escapes that survived an earlier
/// serialization pass as plain text rather than real escape sequences.
fn decode_unicode_escapes(s: &str) -> Option<String> {
    if !s.contains("\\u") {
        return None;
    }
    // serde_json already decodes \uXXXX inside valid string literals; this
    // strategy only helps when such sequences sit outside a parseable
    // string context (e.g. a doubled backslash from a prior encode pass).
    Some(s.replace("\\\\u", "\\u"))
}

/// (b) Repair unescaped control characters inside strings: bare newlines in
/// keys become spaces, in values become an escaped `\n`.
fn repair_unescaped_control_chars(s: &str) -> Option<String> {
    if !s.chars().any(|c| c == '\n' || c == '\r' || c == '\t') {
        return None;
    }
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' | '\r' if in_string => out.push_str("\\n"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    Some(out)
}

/// (c) Strip trailing commas immediately before a closing `]`/`}`.
fn strip_trailing_commas(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut changed = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == ']' || chars[j] == '}') {
                changed = true;
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    changed.then_some(out)
}

/// (d) Quote unquoted object keys when the pattern is unambiguous:
/// `{ key: "value" }` -> `{ "key": "value" }`.
fn quote_unquoted_keys(s: &str) -> Option<String> {
    static RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#).unwrap());
    if !RE.is_match(s) {
        return None;
    }
    Some(RE.replace_all(s, r#"$1"$2"$3"#).into_owned())
}

/// (e) Extract a JSON payload from a Markdown fenced code block
/// (```` ```json ... ``` ````), in case the model ignored the
/// "no fences" instruction.
fn extract_from_fenced_block(s: &str) -> Option<String> {
    let start = s.find("```")?;
    let after_fence = &s[start + 3..];
    let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let end = after_fence.find("```")?;
    Some(after_fence[..end].trim().to_string())
}

/// (f) Complete truncated JSON by balancing open brackets/strings,
/// retrying truncation at prior commas until a parseable prefix is found.
fn complete_truncated_json(s: &str) -> Option<String> {
    let mut attempt = s.trim_end().to_string();

    for _ in 0..32 {
        let balanced = balance_brackets(&attempt);
        if serde_json::from_str::<Value>(&balanced).is_ok() {
            return Some(balanced);
        }
        match attempt.rfind(',') {
            Some(idx) => attempt.truncate(idx),
            None => break,
        }
    }
    None
}

fn balance_brackets(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' if !in_string => {
                if stack.last() == Some(&'{') {
                    stack.pop();
                }
            }
            ']' if !in_string => {
                if stack.last() == Some(&'[') {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = s.to_string();
    if in_string {
        out.push('"');
    }
    for open in stack.iter().rev() {
        out.push(match open {
            '{' => '}',
            '[' => ']',
            _ => unreachable!(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_needs_no_repair() {
        let (_, steps) = repair_and_parse(r#"{"a": 1}"#).unwrap();
        assert_eq!(steps, 0);
    }

    #[test]
    fn strips_trailing_comma_before_brace() {
        let (v, steps) = repair_and_parse(r#"{"a": 1, "b": 2,}"#).unwrap();
        assert_eq!(v["b"], 2);
        assert!(steps > 0);
    }

    #[test]
    fn strips_trailing_comma_before_bracket() {
        let (v, _) = repair_and_parse(r#"{"a": [1, 2, 3,]}"#).unwrap();
        assert_eq!(v["a"][2], 3);
    }

    #[test]
    fn quotes_unquoted_keys() {
        let (v, _) = repair_and_parse(r#"{name: "Ada", age: 30}"#).unwrap();
        assert_eq!(v["name"], "Ada");
        assert_eq!(v["age"], 30);
    }

    #[test]
    fn extracts_from_fenced_block() {
        let raw = "```json\n{\"a\": 1}\n```";
        let (v, _) = repair_and_parse(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn completes_truncated_object() {
        let raw = r#"{"a": 1, "b": {"c": 2"#;
        let (v, _) = repair_and_parse(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn truncated_beyond_repair_fails() {
        let raw = r#"not json at all and no brackets"#;
        assert!(repair_and_parse(raw).is_err());
    }

    #[test]
    fn idempotent_on_already_valid_json() {
        // Testable property #6 (spec §8): repairing already-valid JSON
        // yields byte-equivalent output.
        let raw = r#"{"a":1,"b":[1,2,3]}"#;
        let (v1, steps1) = repair_and_parse(raw).unwrap();
        assert_eq!(steps1, 0);
        let reserialized = serde_json::to_string(&v1).unwrap();
        let (v2, steps2) = repair_and_parse(&reserialized).unwrap();
        assert_eq!(steps2, 0);
        assert_eq!(v1, v2);
    }
}
