//! Request translation: `(body, target dialect, native model id) -> new
//! body`. The inbound body is cloned, never mutated.

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tariff_protocol::Dialect;
use tariff_protocol::anthropic::{Message as BMessage, MessagesRequestBody};
use tariff_protocol::gemini::{
    Content, GenerateContentRequest, GenerationConfig,
};
use tariff_protocol::openai::ChatCompletionRequestBody;

use super::DEFAULT_MAX_TOKENS;
use super::normalize::normalize_messages;
use crate::error::TranslateError;

/// Translate an A-dialect body for the target dialect, rewriting the
/// model field to the provider-native id.
pub fn translate_request(
    body: &ChatCompletionRequestBody,
    dialect: Dialect,
    native_model: &str,
) -> Result<Bytes, TranslateError> {
    match dialect {
        Dialect::OpenAiChat => build_openai_request(body, native_model),
        Dialect::Messages => build_messages_request(body, native_model),
        Dialect::GenerateContent => build_generate_content_request(body),
    }
}

/// A -> A: passthrough except for the model rewrite and normalization.
pub fn build_openai_request(
    body: &ChatCompletionRequestBody,
    native_model: &str,
) -> Result<Bytes, TranslateError> {
    let mut out = body.clone();
    out.model = native_model.to_string();
    out.messages = normalize_messages(&body.messages);
    Ok(Bytes::from(serde_json::to_vec(&out)?))
}

/// A -> B: consecutive leading `system` messages become the top-level
/// `system` string, remaining messages are coerced to alternating
/// user/assistant, and `max_tokens` is defaulted because dialect B
/// requires it.
pub fn build_messages_request(
    body: &ChatCompletionRequestBody,
    native_model: &str,
) -> Result<Bytes, TranslateError> {
    let messages = normalize_messages(&body.messages);

    let mut system_parts: Vec<String> = Vec::new();
    let mut rest: Vec<&tariff_protocol::openai::ChatMessage> = Vec::new();
    let mut in_preamble = true;
    for message in &messages {
        if in_preamble && message.role == "system" {
            system_parts.push(message.content_text());
            continue;
        }
        in_preamble = false;
        // A late system message has no slot in dialect B; it is coerced
        // below like everything else.
        rest.push(message);
    }

    let mut coerced: Vec<BMessage> = Vec::new();
    for message in rest {
        let role = match message.role.as_str() {
            "assistant" => "assistant",
            _ => "user",
        };
        let mut text = message.content_text();
        if let Some(tool_calls) = &message.tool_calls {
            // Dialect B carries tool calls as content blocks; the lossy
            // textual form keeps the conversation coherent.
            for call in tool_calls {
                text.push_str(&format!(
                    "\n[tool call {}: {}({})]",
                    call.id, call.function.name, call.function.arguments
                ));
            }
        }
        match coerced.last_mut() {
            Some(last) if last.role == role => {
                if let JsonValue::String(existing) = &mut last.content {
                    existing.push_str("\n\n");
                    existing.push_str(&text);
                }
            }
            _ => coerced.push(BMessage::text(role, text)),
        }
    }

    if coerced.first().map(|m| m.role.as_str()) != Some("user") {
        coerced.insert(0, BMessage::text("user", "(continuing conversation)"));
    }

    let out = MessagesRequestBody {
        model: native_model.to_string(),
        max_tokens: body.requested_max_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        messages: coerced,
        temperature: body.temperature,
        top_p: body.top_p,
        stream: body.stream,
        stop_sequences: stop_to_sequences(body.stop.as_ref()),
        tools: None,
        extra: serde_json::Map::new(),
    };
    Ok(Bytes::from(serde_json::to_vec(&out)?))
}

/// A -> C: each message becomes a content-part tree; the model and the
/// stream flag live in the URL, not the body. The first non-system entry
/// must have role `user`, so a synthetic one is injected when it does not.
pub fn build_generate_content_request(
    body: &ChatCompletionRequestBody,
) -> Result<Bytes, TranslateError> {
    let messages = normalize_messages(&body.messages);

    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    for message in &messages {
        match message.role.as_str() {
            "system" => system_parts.push(message.content_text()),
            "assistant" => contents.push(Content::text("model", message.content_text())),
            _ => contents.push(Content::text("user", message.content_text())),
        }
    }

    if contents.first().and_then(|c| c.role.as_deref()) != Some("user") {
        contents.insert(0, Content::text("user", "(continuing conversation)"));
    }

    let generation_config = GenerationConfig {
        max_output_tokens: body.requested_max_tokens(),
        temperature: body.temperature,
        top_p: body.top_p,
        stop_sequences: stop_to_sequences(body.stop.as_ref()),
    };

    let out = GenerateContentRequest {
        contents,
        system_instruction: (!system_parts.is_empty())
            .then(|| Content::text("user", system_parts.join("\n\n"))),
        generation_config: Some(generation_config),
        tools: None,
    };
    Ok(Bytes::from(serde_json::to_vec(&out)?))
}

fn stop_to_sequences(stop: Option<&JsonValue>) -> Option<Vec<String>> {
    match stop {
        Some(JsonValue::String(s)) => Some(vec![s.clone()]),
        Some(JsonValue::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

/// Path + query suffix for the target dialect, relative to the base URL.
pub fn request_path(dialect: Dialect, native_model: &str, stream: bool) -> String {
    match dialect {
        Dialect::OpenAiChat => "/chat/completions".to_string(),
        Dialect::Messages => "/messages".to_string(),
        Dialect::GenerateContent => {
            if stream {
                format!("/models/{native_model}:streamGenerateContent?alt=sse")
            } else {
                format!("/models/{native_model}:generateContent")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tariff_protocol::openai::ChatMessage;

    fn body(messages: Vec<ChatMessage>) -> ChatCompletionRequestBody {
        ChatCompletionRequestBody {
            model: "auto".to_string(),
            messages,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stream: None,
            stop: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            user: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn openai_request_rewrites_model_only() {
        let input = body(vec![ChatMessage::text("user", "hi")]);
        let bytes = build_openai_request(&input, "gpt-4o-mini").unwrap();
        let out: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out["model"], "gpt-4o-mini");
        assert_eq!(out["messages"][0]["content"], "hi");
    }

    #[test]
    fn messages_request_extracts_system_and_defaults_max_tokens() {
        let input = body(vec![
            ChatMessage::text("system", "You are terse."),
            ChatMessage::text("system", "Answer in French."),
            ChatMessage::text("user", "Bonjour?"),
        ]);
        let bytes = build_messages_request(&input, "claude-sonnet-4-20250514").unwrap();
        let out: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out["system"], "You are terse.\n\nAnswer in French.");
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
        assert_eq!(out["messages"][0]["role"], "user");
    }

    #[test]
    fn messages_request_merges_consecutive_roles() {
        let input = body(vec![
            ChatMessage::text("user", "one"),
            ChatMessage::text("user", "two"),
            ChatMessage::text("assistant", "reply"),
        ]);
        let bytes = build_messages_request(&input, "m").unwrap();
        let out: JsonValue = serde_json::from_slice(&bytes).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "one\n\ntwo");
    }

    #[test]
    fn messages_request_injects_leading_user_turn() {
        let input = body(vec![ChatMessage::text("assistant", "I was saying")]);
        let bytes = build_messages_request(&input, "m").unwrap();
        let out: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out["messages"][0]["role"], "user");
        assert_eq!(out["messages"][0]["content"], "(continuing conversation)");
    }

    #[test]
    fn generate_content_builds_part_trees() {
        let mut input = body(vec![
            ChatMessage::text("system", "be brief"),
            ChatMessage::text("user", "hello"),
            ChatMessage::text("assistant", "hi"),
        ]);
        input.max_tokens = Some(256);
        let bytes = build_generate_content_request(&input).unwrap();
        let out: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(out["contents"][0]["role"], "user");
        assert_eq!(out["contents"][1]["role"], "model");
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn generate_content_guarantees_first_user_turn() {
        let input = body(vec![ChatMessage::text("assistant", "resuming")]);
        let bytes = build_generate_content_request(&input).unwrap();
        let out: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(out["contents"][0]["role"], "user");
        assert_eq!(
            out["contents"][0]["parts"][0]["text"],
            "(continuing conversation)"
        );
    }

    #[test]
    fn stream_flag_maps_to_sse_query_parameter() {
        assert_eq!(
            request_path(Dialect::GenerateContent, "gemini-2.0-flash", true),
            "/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            request_path(Dialect::GenerateContent, "gemini-2.0-flash", false),
            "/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(request_path(Dialect::Messages, "m", true), "/messages");
    }
}
