//! The dialect adapter (C5). Translation is a pure function of bytes:
//! nothing in here performs IO, retries, or touches shared state, and the
//! inbound body is never mutated in place.

mod normalize;
mod request;
mod response;
mod stream;
mod thinking;

pub use normalize::{normalize_messages, sanitize_tool_call_id};
pub use request::{
    build_generate_content_request, build_messages_request, build_openai_request, request_path,
    translate_request,
};
pub use response::{translate_response, upstream_error_frame};
pub use stream::StreamTranslator;
pub use thinking::strip_thinking;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
