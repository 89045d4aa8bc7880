//! Wire types for the three upstream dialects plus the SSE parser.
//!
//! This crate intentionally does not depend on axum or any HTTP client;
//! it only knows the byte shapes that cross the wire.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod sse;

use serde::{Deserialize, Serialize};

/// Wire shape of a provider's HTTP API.
///
/// A = OpenAI-compatible chat, B = "messages" with a top-level `system`,
/// C = streamed generate-content over SSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    OpenAiChat,
    Messages,
    GenerateContent,
}
