//! Prompt registry for vision-LLM field extraction (spec §4.3).
//!
//! Centralising every prompt/schema pair here serves two purposes:
//!
//! 1. **Single source of truth** — changing extraction behaviour for a task
//!    requires editing exactly one place.
//! 2. **Testability** — unit tests can look up prompts directly without a
//!    real LLM call, making prompt regressions easy to catch.
//!
//! [`lookup`] is a deterministic function `(task, content_type, document_type,
//! context) -> (prompt, schema)`, replacing the teacher's single
//! `DEFAULT_SYSTEM_PROMPT` constant with a small table keyed on the same
//! axes the original Python prompt builder branched on.

use crate::config::ExtractionTask;
use crate::model::ContentType;
use serde_json::{json, Value};

/// Page-level context threaded into bank-statement (and similar continuation
/// document types) prompts (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub is_first_page: bool,
    pub table_headers: Vec<String>,
    pub page_number: usize,
}

/// A permissive schema for extraction tasks: downstream parsing stays
/// resilient to whatever shape the model actually emits.
fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": true,
    })
}

/// A strict schema for classification tasks.
fn classification_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "matched_template_id": {"type": ["string", "null"]},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"},
        },
        "required": ["confidence"],
    })
}

const FIELD_DETECTION_PROMPT: &str = r#"You are an expert document-field extractor. Examine the page content and return a single JSON object whose keys are the field names you find (grouped under a top-level section name per logical area of the page) and whose values are the field values.

Rules:
1. Preserve the natural reading order of fields as keys.
2. Use nested objects for logical groupings (e.g. "customer": {"name": ..., "address": ...}).
3. Use arrays for repeated line items (e.g. table rows).
4. Wrap any value you are uncertain about as {"_type": "text", "value": "..."} rather than omitting it.
5. Do not invent fields that are not present on the page.
6. Output ONLY the JSON object. No markdown fences, no commentary."#;

const FORM_CREATION_PROMPT: &str = r#"You are building a reusable field schema from this page. Return a JSON object describing every fillable field you can identify: keys are field names, values are example values taken from the page (or empty string if the field has no example visible).

Output ONLY the JSON object."#;

const TEMPLATE_MATCHING_PROMPT: &str = r#"You are given a document page and a list of candidate extraction templates. Decide which template (if any) best matches this document's layout and return {"matched_template_id": "...", "confidence": 0.0-1.0, "reasoning": "..."}. If no template matches well, set matched_template_id to null."#;

const DB_TEMPLATE_MATCHING_PROMPT: &str = r#"You are given a document page and a list of candidate templates sourced from a database. Decide which template (if any) best matches this document's layout and return {"matched_template_id": "...", "confidence": 0.0-1.0, "reasoning": "..."}. If no template matches well, set matched_template_id to null."#;

const WITHOUT_TEMPLATE_EXTRACTION_PROMPT: &str = r#"You are an expert document extractor with no prior knowledge of this document's schema. Examine the page and return a single JSON object capturing every piece of structured information present: headings as section keys, repeated rows as arrays, individual values as typed leaves where ambiguous ({"_type": "date", "value": "..."}).

Output ONLY the JSON object."#;

const TEMPLATE_GUIDED_EXTRACTION_PROMPT: &str = r#"You are extracting fields from this page guided by a known template. Populate the fields described in the accompanying template hints; if a hinted field is not present on this page, omit its key rather than guessing.

Output ONLY the JSON object."#;

const BANK_STATEMENT_FIRST_PAGE_SUFFIX: &str = r#"

This is a bank statement. In addition to any header fields (account holder, account number, statement period, opening balance), detect the transaction table's column headers and emit them verbatim as an array under the key "_table_headers". Then emit each transaction row as an object under "transactions" using exactly those column names as keys."#;

const BANK_STATEMENT_CONTINUATION_SUFFIX: &str = r#"

This is a continuation page of a bank statement. The transaction table uses the following column headers, established on page 1 — use exactly these keys for every row, in this order: {headers}. Emit the rows for this page under the key "transactions"; do not re-emit "_table_headers"."#;

/// Resolve the prompt and response schema for a given task/content-type/
/// document-type/context combination (spec §4.3).
pub fn lookup(
    task: ExtractionTask,
    content_type: ContentType,
    document_type: Option<&str>,
    context: &PromptContext,
) -> (String, Value) {
    if task == ExtractionTask::BankStatementExtraction
        || (task == ExtractionTask::WithoutTemplateExtraction
            && document_type == Some("bank_statement"))
    {
        let mut prompt = WITHOUT_TEMPLATE_EXTRACTION_PROMPT.to_string();
        prompt.push_str(&bank_statement_context_suffix(context));
        return (prompt, extraction_schema());
    }

    let base = match task {
        ExtractionTask::FieldDetection => FIELD_DETECTION_PROMPT,
        ExtractionTask::FormCreation => FORM_CREATION_PROMPT,
        ExtractionTask::TemplateMatching => TEMPLATE_MATCHING_PROMPT,
        ExtractionTask::DbTemplateMatching => DB_TEMPLATE_MATCHING_PROMPT,
        ExtractionTask::WithoutTemplateExtraction => WITHOUT_TEMPLATE_EXTRACTION_PROMPT,
        ExtractionTask::TemplateGuidedExtraction => TEMPLATE_GUIDED_EXTRACTION_PROMPT,
        ExtractionTask::BankStatementExtraction => WITHOUT_TEMPLATE_EXTRACTION_PROMPT,
    };

    let schema = match task {
        ExtractionTask::TemplateMatching | ExtractionTask::DbTemplateMatching => classification_schema(),
        _ => extraction_schema(),
    };

    let prompt = match content_type {
        ContentType::Text => base.to_string(),
        ContentType::Image => format!("{base}\n\nThe page is attached as an image; read it visually."),
    };

    (prompt, schema)
}

fn bank_statement_context_suffix(context: &PromptContext) -> String {
    if context.is_first_page || context.table_headers.is_empty() {
        BANK_STATEMENT_FIRST_PAGE_SUFFIX.to_string()
    } else {
        BANK_STATEMENT_CONTINUATION_SUFFIX.replace("{headers}", &context.table_headers.join(", "))
    }
}

/// Build the context message carrying the previous page's hierarchical data,
/// mirroring the teacher's `maintain_format_context` idiom for bank
/// statement continuation pages that need the prior page's JSON as context
/// rather than just its table headers.
pub fn maintain_format_context(prior_page_summary: &str) -> String {
    format!(
        "The following is a compact summary of the previous page's extracted data, for continuity:\n\n\"\"\"{}\"\"\"",
        prior_page_summary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_statement_first_page_requests_table_headers() {
        let ctx = PromptContext {
            is_first_page: true,
            table_headers: vec![],
            page_number: 1,
        };
        let (prompt, _) = lookup(
            ExtractionTask::WithoutTemplateExtraction,
            ContentType::Text,
            Some("bank_statement"),
            &ctx,
        );
        assert!(prompt.contains("_table_headers"));
    }

    #[test]
    fn bank_statement_continuation_carries_headers() {
        let ctx = PromptContext {
            is_first_page: false,
            table_headers: vec!["Date".into(), "Narration".into(), "Closing Balance".into()],
            page_number: 2,
        };
        let (prompt, _) = lookup(
            ExtractionTask::WithoutTemplateExtraction,
            ContentType::Text,
            Some("bank_statement"),
            &ctx,
        );
        assert!(prompt.contains("Date, Narration, Closing Balance"));
        assert!(!prompt.contains("_table_headers\" field"));
    }

    #[test]
    fn template_matching_uses_strict_schema() {
        let (_, schema) = lookup(
            ExtractionTask::TemplateMatching,
            ContentType::Text,
            None,
            &PromptContext::default(),
        );
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn extraction_tasks_use_permissive_schema() {
        let (_, schema) = lookup(
            ExtractionTask::FieldDetection,
            ContentType::Image,
            None,
            &PromptContext::default(),
        );
        assert_eq!(schema["additionalProperties"], true);
    }
}
