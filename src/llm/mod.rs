//! LLM Client (C2, spec §4.2).
//!
//! Typed, retry-wrapped request/response to a chat-completions endpoint,
//! with a JSON repair pipeline and token accounting. Grounded in the
//! teacher's `pipeline/llm.rs` (retry/backoff shape, `ChatMessage`/
//! `ImageData`-style request) generalized from "always Markdown" to "typed
//! JSON with repair", and in `original_source/.../llm_client.py` for the
//! repair-pipeline semantics.

pub mod client;
pub mod json_repair;
pub mod schema;

pub use client::{LlmClient, LlmContent, LlmResponse};
pub use schema::normalize_for_task;
