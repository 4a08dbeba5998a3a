//! Typed, retry-wrapped LLM request/response (spec §4.2).
//!
//! Grounded in the teacher's `pipeline/llm.rs`: builds a `ChatMessage` list
//! (system prompt + optional continuity context + user message, with an
//! image attachment on the image path), retries on transport errors with
//! exponential backoff, and returns a structured result rather than ever
//! panicking on a bad response. Generalized from "always request Markdown"
//! to "request typed JSON, repair on parse failure, normalize per task".

use std::time::Instant;

use edgequake_llm::{ChatMessage, ImageData, LLMProvider};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ExtractionTask, LlmConfig};
use crate::error::StageError;
use crate::llm::json_repair::repair_and_parse;
use crate::llm::schema::normalize_for_task;
use crate::model::{HierValue, TokenUsage};

/// The page payload handed to the LLM: either extracted text or an encoded
/// image data URL (spec §4.2 "Transport").
pub enum LlmContent {
    Text(String),
    Image(String),
}

/// Successful result of one LLM call, already parsed and normalized.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub hierarchical_data: HierValue,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    pub duration_ms: u64,
    pub retries: u8,
}

pub struct LlmClient {
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// `call(prompt, content, schema, task, doc_tag, page) -> Response`
    /// (spec §4.2 contract). Retries transport-level failures with
    /// exponential backoff (1, 2, 4s...); non-network errors surface
    /// immediately as a [`StageError`] and are not retried here (the
    /// per-stage retry budget in the page pipeline handles those).
    pub async fn call(
        &self,
        prompt: &str,
        content: &LlmContent,
        schema: &Value,
        task: ExtractionTask,
        doc_tag: &str,
        page: usize,
    ) -> Result<LlmResponse, StageError> {
        let provider = self
            .config
            .provider
            .as_ref()
            .expect("LlmClient constructed without a bound provider")
            .clone();

        let messages = build_messages(prompt, content);
        let started = Instant::now();

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_ms = self.config.retry_backoff_ms * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                debug!(doc_tag, page, attempt, "retrying LLM call after transport error");
            }

            let result = tokio::time::timeout(
                std::time::Duration::from_secs(self.config.api_timeout_secs),
                provider.complete(edgequake_llm::CompletionRequest {
                    model: self.config.model.clone().unwrap_or_default(),
                    messages: messages.clone(),
                    temperature: self.config.temperature,
                    max_tokens: self.config.max_tokens,
                    response_format: Some(schema.clone()),
                }),
            )
            .await;

            let response = match result {
                Err(_) => {
                    return Err(StageError::Timeout {
                        page,
                        secs: self.config.api_timeout_secs,
                    })
                }
                Ok(Err(e)) => {
                    if is_transport_error(&e) {
                        last_err = Some(e.to_string());
                        continue;
                    }
                    return Err(StageError::ProviderError {
                        page,
                        detail: e.to_string(),
                    });
                }
                Ok(Ok(resp)) => resp,
            };

            let usage = TokenUsage {
                prompt_tokens: response.usage.prompt_tokens as u64,
                completion_tokens: response.usage.completion_tokens as u64,
                reasoning_tokens: response.usage.reasoning_tokens.unwrap_or(0) as u64,
                text_tokens: response.usage.text_tokens.unwrap_or(0) as u64,
            };

            // `completion_tokens` includes `reasoning_tokens` as a subset
            // (OpenAI-style `completion_tokens_details`), so it is never zero
            // whenever reasoning_tokens > 0 — the actual "produced no visible
            // output" signal is `text_tokens == 0` (spec §4.2, grounded in
            // `llm_client.py`'s `completion_tokens_details.text_tokens`).
            if response.finish_reason.as_deref() == Some("length")
                && usage.reasoning_tokens > 0
                && usage.text_tokens == 0
            {
                return Err(StageError::TokenLimitExceeded { page });
            }

            let (value, repair_steps) = repair_and_parse(&response.content).map_err(|detail| {
                StageError::JsonParseFailed { page, detail }
            })?;
            if repair_steps > 0 {
                warn!(doc_tag, page, repair_steps, "repaired malformed LLM JSON response");
            }

            let hierarchical_data = normalize_for_task(task, value);

            return Ok(LlmResponse {
                hierarchical_data,
                usage,
                finish_reason: response.finish_reason,
                duration_ms: started.elapsed().as_millis() as u64,
                retries: attempt as u8,
            });
        }

        Err(StageError::TransportFailed {
            page,
            retries: self.config.max_retries as u8,
            detail: last_err.unwrap_or_else(|| "unknown transport error".into()),
        })
    }
}

fn build_messages(prompt: &str, content: &LlmContent) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(prompt)];
    match content {
        LlmContent::Text(text) => messages.push(ChatMessage::user(text.clone())),
        LlmContent::Image(data_url) => {
            let image = ImageData::from_data_url(data_url).with_detail("high");
            messages.push(ChatMessage::user_with_image(String::new(), image));
        }
    }
    messages
}

fn is_transport_error(e: &edgequake_llm::Error) -> bool {
    matches!(
        e,
        edgequake_llm::Error::Network(_) | edgequake_llm::Error::Timeout(_) | edgequake_llm::Error::Connection(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_messages_text_path_has_two_messages() {
        let msgs = build_messages("system prompt", &LlmContent::Text("page text".into()));
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn build_messages_image_path_has_two_messages() {
        let msgs = build_messages(
            "system prompt",
            &LlmContent::Image("data:image/jpeg;base64,AAA".into()),
        );
        assert_eq!(msgs.len(), 2);
    }
}
