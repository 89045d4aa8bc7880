//! Message normalization applied before dispatch, whatever the target
//! dialect.

use tariff_protocol::openai::ChatMessage;

/// Characters outside `[A-Za-z0-9_-]` are replaced; at least one strict
/// upstream validator rejects anything else in a tool-call id.
pub fn sanitize_tool_call_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn normalize_role(role: &str) -> String {
    match role {
        "system" | "user" | "assistant" | "tool" => role.to_string(),
        "developer" => "system".to_string(),
        "model" => "assistant".to_string(),
        _ => "user".to_string(),
    }
}

/// Remap nonstandard roles, sanitize tool-call ids, and backfill
/// `reasoning_content` on thinking assistant messages that carry tool
/// calls (required by at least one A-dialect provider).
pub fn normalize_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| {
            let mut out = message.clone();
            out.role = normalize_role(&message.role);
            if let Some(tool_calls) = &mut out.tool_calls {
                for call in tool_calls.iter_mut() {
                    call.id = sanitize_tool_call_id(&call.id);
                }
            }
            if let Some(id) = &out.tool_call_id {
                out.tool_call_id = Some(sanitize_tool_call_id(id));
            }
            if out.role == "assistant"
                && out.thinking.is_some()
                && out.tool_calls.is_some()
                && out.reasoning_content.is_none()
            {
                out.reasoning_content = Some(String::new());
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tariff_protocol::openai::{ToolCall, ToolCallFunction};

    #[test]
    fn tool_call_ids_are_sanitized() {
        assert_eq!(sanitize_tool_call_id("call_abc-123"), "call_abc-123");
        assert_eq!(sanitize_tool_call_id("call:abc/123!x"), "call_abc_123_x");
        assert_eq!(sanitize_tool_call_id("调用-1"), "__-1");
    }

    #[test]
    fn nonstandard_roles_are_remapped() {
        let messages = vec![
            ChatMessage::text("developer", "be terse"),
            ChatMessage::text("model", "ok"),
            ChatMessage::text("critic", "unknown role"),
        ];
        let out = normalize_messages(&messages);
        assert_eq!(out[0].role, "system");
        assert_eq!(out[1].role, "assistant");
        assert_eq!(out[2].role, "user");
    }

    #[test]
    fn thinking_assistant_with_tool_calls_gets_reasoning_content() {
        let mut message = ChatMessage::text("assistant", "");
        message.thinking = Some(json!({"type": "enabled"}));
        message.tool_calls = Some(vec![ToolCall {
            id: "call#1".to_string(),
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: "lookup".to_string(),
                arguments: "{}".to_string(),
            },
        }]);
        let out = normalize_messages(&[message]);
        assert_eq!(out[0].reasoning_content.as_deref(), Some(""));
        assert_eq!(out[0].tool_calls.as_ref().unwrap()[0].id, "call_1");
    }
}
