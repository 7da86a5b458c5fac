//! Translation between provider-agnostic conversation types and the Messages API format.

use serde_json::{json, Map, Value};

use orchestria_tool_runtime::{
    ContentBlock, Message, MessageContent, ProviderError, Role, ToolDefinition,
};

/// Translate a [`ToolDefinition`] into the Messages API tool format.
pub(super) fn tool_definition_to_anthropic(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

/// System messages go into the top-level `system` field, joined by blank lines.
pub(super) fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let (system, rest): (Vec<&Message>, Vec<&Message>) =
        messages.iter().partition(|m| m.role == Role::System);
    let system = if system.is_empty() {
        None
    } else {
        Some(
            system
                .iter()
                .map(|m| m.text())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };
    (system, rest)
}

fn block_to_anthropic(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": tool_input(input),
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

/// The API only accepts objects as tool input.
fn tool_input(input: &Value) -> Value {
    match input {
        Value::Object(_) => input.clone(),
        Value::String(raw) => json!({ "input": raw }),
        other => json!({ "input": other }),
    }
}

/// Translate a [`Message`] into a Messages API message object.
///
/// `tool` messages are sent as `user` messages carrying `tool_result`
/// blocks; system messages are handled by [`split_system`].
pub fn message_to_anthropic(msg: &Message) -> Value {
    let role = match msg.role {
        Role::Assistant => "assistant",
        Role::System | Role::User | Role::Tool => "user",
    };
    let content = match &msg.content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Blocks(blocks) => {
            Value::Array(blocks.iter().map(block_to_anthropic).collect())
        }
    };
    json!({"role": role, "content": content})
}

fn block_from_anthropic(block: &Value) -> Result<ContentBlock, ProviderError> {
    let field = |name: &str| -> Result<String, ProviderError> {
        block[name]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("content block without '{name}'")))
    };
    match block["type"].as_str() {
        Some("text") => Ok(ContentBlock::Text { text: field("text")? }),
        Some("tool_use") => Ok(ContentBlock::ToolUse {
            id: field("id")?,
            name: field("name")?,
            input: block
                .get("input")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        }),
        Some("tool_result") => Ok(ContentBlock::ToolResult {
            tool_use_id: field("tool_use_id")?,
            content: match &block["content"] {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            },
            is_error: block["is_error"].as_bool().unwrap_or(false),
        }),
        other => Err(ProviderError::InvalidResponse(format!(
            "unsupported content block type {other:?}"
        ))),
    }
}

/// Translate a Messages API message object back into a [`Message`].
///
/// A `user` message made only of `tool_result` blocks becomes a `tool`
/// message, mirroring [`message_to_anthropic`].
pub fn message_from_anthropic(value: &Value) -> Result<Message, ProviderError> {
    let role = match value["role"].as_str() {
        Some("assistant") => Role::Assistant,
        Some("user") => Role::User,
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "unsupported role {other:?}"
            )))
        }
    };
    match &value["content"] {
        Value::String(text) => Ok(Message::new(role, text.clone())),
        Value::Array(blocks) => {
            let blocks = blocks
                .iter()
                .map(block_from_anthropic)
                .collect::<Result<Vec<_>, _>>()?;
            let all_results = !blocks.is_empty()
                && blocks
                    .iter()
                    .all(|b| matches!(b, ContentBlock::ToolResult { .. }));
            let role = if role == Role::User && all_results {
                Role::Tool
            } else {
                role
            };
            Ok(Message::blocks(role, blocks))
        }
        _ => Err(ProviderError::InvalidResponse(
            "message content must be a string or an array".to_string(),
        )),
    }
}
