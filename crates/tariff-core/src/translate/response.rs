//! Non-stream response translation back to the A dialect.

use bytes::Bytes;
use tariff_protocol::Dialect;
use tariff_protocol::anthropic::{ContentBlock, MessagesResponse, map_stop_reason};
use tariff_protocol::gemini::{GenerateContentResponse, map_finish_reason};
use tariff_protocol::openai::{
    ChatChoice, ChatCompletionResponse, ErrorBody, ResponseMessage, ToolCall, ToolCallFunction,
    Usage,
};

use super::thinking::strip_thinking;
use crate::error::TranslateError;

/// Translate a completed upstream body into an A-shaped completion. The
/// `model` field in the result is the registry id the router chose, so
/// clients see what they were actually served by.
pub fn translate_response(
    bytes: &Bytes,
    source: Dialect,
    model_id: &str,
    created: i64,
) -> Result<Bytes, TranslateError> {
    match source {
        Dialect::OpenAiChat => rewrite_openai_response(bytes, model_id),
        Dialect::Messages => messages_to_openai(bytes, model_id, created),
        Dialect::GenerateContent => generate_content_to_openai(bytes, model_id, created),
    }
}

/// A -> A: keep the body, rewrite the model id, strip thinking blocks
/// from every choice's content.
fn rewrite_openai_response(bytes: &Bytes, model_id: &str) -> Result<Bytes, TranslateError> {
    let mut response: ChatCompletionResponse = serde_json::from_slice(bytes)?;
    response.model = model_id.to_string();
    for choice in &mut response.choices {
        if let Some(content) = &choice.message.content {
            choice.message.content = Some(strip_thinking(content));
        }
    }
    Ok(Bytes::from(serde_json::to_vec(&response)?))
}

/// B -> A: concatenate text parts, lift tool_use blocks into tool_calls,
/// map the stop reason, and convert the usage counters.
fn messages_to_openai(
    bytes: &Bytes,
    model_id: &str,
    created: i64,
) -> Result<Bytes, TranslateError> {
    let response: MessagesResponse = serde_json::from_slice(bytes)?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in &response.content {
        match block {
            ContentBlock::Text { text: part } => text.push_str(part),
            ContentBlock::Thinking { .. } => {}
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: ToolCallFunction {
                    name: name.clone(),
                    arguments: serde_json::to_string(input)?,
                },
            }),
        }
    }

    let out = ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created,
        model: model_id.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(strip_thinking(&text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: response.stop_reason.as_deref().map(map_stop_reason),
        }],
        usage: Some(Usage::new(
            response.usage.input_tokens,
            response.usage.output_tokens,
        )),
        extra: serde_json::Map::new(),
    };
    Ok(Bytes::from(serde_json::to_vec(&out)?))
}

/// C -> A: first candidate's parts become the message content.
fn generate_content_to_openai(
    bytes: &Bytes,
    model_id: &str,
    created: i64,
) -> Result<Bytes, TranslateError> {
    let response: GenerateContentResponse = serde_json::from_slice(bytes)?;
    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| TranslateError::new("no candidates in upstream response"))?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    if let Some(content) = &candidate.content {
        for part in &content.parts {
            if let Some(part_text) = &part.text {
                text.push_str(part_text);
            }
            if let Some(call) = &part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", tool_calls.len()),
                    kind: "function".to_string(),
                    function: ToolCallFunction {
                        name: call.name.clone(),
                        arguments: serde_json::to_string(&call.args)?,
                    },
                });
            }
        }
    }

    let usage = response.usage_metadata.map(|meta| {
        Usage::new(meta.prompt_token_count, meta.candidates_token_count)
    });

    let out = ChatCompletionResponse {
        id: format!("chatcmpl-{model_id}-{created}"),
        object: "chat.completion".to_string(),
        created,
        model: model_id.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(strip_thinking(&text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: candidate.finish_reason.as_deref().map(map_finish_reason),
        }],
        usage,
        extra: serde_json::Map::new(),
    };
    Ok(Bytes::from(serde_json::to_vec(&out)?))
}

/// Mid-stream error frame: the only shape a strict SSE client accepts
/// once headers are gone.
pub fn upstream_error_frame(kind: &str, message: &str) -> Bytes {
    let body = ErrorBody::new(kind, message);
    let data = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
    tariff_protocol::sse::encode_data_frame(&data)
}
