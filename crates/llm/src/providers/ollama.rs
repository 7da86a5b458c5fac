//! Ollama chat backend.
//!
//! Ollama streams newline-delimited JSON objects from `/api/chat`. The
//! tool catalog is never sent: tools reach the model through the system
//! prompt and calls come back as plain text.

use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use orchestria_tool_runtime::{
    ContentBlock, FragmentStream, Message, MessageContent, ProviderAdapter, ProviderCapability,
    ProviderError, Role, StopReason, StreamEvent, TurnRequest,
};

use super::{error_for_status, retry_after_secs, LineBuffer};

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
}

impl OllamaProvider {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Flatten a message into Ollama's `{role, content}` shape.
///
/// Block content is joined into plain text; tool results keep only their
/// content since the text backend has no call ids.
pub fn message_to_ollama(msg: &Message) -> Value {
    let content = match &msg.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::ToolUse { name, input, .. } => format!("{name}[{input}]"),
                ContentBlock::ToolResult { content, .. } => content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };
    json!({"role": role_name(msg.role), "content": content})
}

pub fn message_from_ollama(value: &Value) -> Result<Message, ProviderError> {
    let role = match value["role"].as_str() {
        Some("system") => Role::System,
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some("tool") => Role::Tool,
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "unsupported role {other:?}"
            )))
        }
    };
    let content = value["content"].as_str().ok_or_else(|| {
        ProviderError::InvalidResponse("message content must be a string".to_string())
    })?;
    Ok(Message::new(role, content))
}

pub(super) fn request_body(request: &TurnRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_ollama).collect();
    json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "options": request.options,
    })
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

fn translate_line(line: &str) -> Result<Vec<StreamEvent>, ProviderError> {
    if line.trim().is_empty() {
        return Ok(Vec::new());
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::InvalidResponse(format!("bad chat chunk: {e}")))?;

    let mut events = Vec::new();
    if let Some(message) = chunk.error {
        events.push(StreamEvent::Error { message });
        return Ok(events);
    }
    if let Some(text) = chunk.message.map(|m| m.content).filter(|t| !t.is_empty()) {
        events.push(StreamEvent::TextDelta { text });
    }
    if chunk.done {
        let reason = chunk.done_reason.as_deref().unwrap_or("stop");
        events.push(StreamEvent::EndOfTurn {
            stop_reason: StopReason::from_wire(reason),
        });
    }
    Ok(events)
}

/// Turn the NDJSON byte stream into fragments.
///
/// A line that is not valid JSON ends the stream with
/// [`ProviderError::InvalidResponse`].
pub(super) fn decode_ndjson_stream<S, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + 'static,
{
    struct State<E> {
        bytes: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
        lines: LineBuffer,
        pending: std::collections::VecDeque<Result<StreamEvent, ProviderError>>,
        finished: bool,
    }

    impl<E> State<E> {
        fn feed(&mut self, line: &str) {
            match translate_line(line) {
                Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
        }
    }

    let state = State {
        bytes: Box::pin(bytes),
        lines: LineBuffer::default(),
        pending: Default::default(),
        finished: false,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        if state.finished {
                            break;
                        }
                        state.feed(&line);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ProviderError::Stream(e.to_string())), state));
                }
                None => {
                    if let Some(line) = state.lines.finish() {
                        state.feed(&line);
                    }
                    state.finished = true;
                }
            }
        }
    });

    Box::pin(events)
}

#[async_trait]
impl ProviderAdapter for OllamaProvider {
    fn capability(&self) -> ProviderCapability {
        ProviderCapability::StreamingText
    }

    async fn stream_turn(&self, request: TurnRequest) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}/api/chat", self.url);
        let body = request_body(&request);

        debug!(model = %request.model, url = %url, "Ollama streaming request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), retry_after, body));
        }

        Ok(decode_ndjson_stream(response.bytes_stream()))
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn chunks(text: &str, size: usize) -> Vec<Result<Bytes, std::io::Error>> {
        text.as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    #[test]
    fn test_message_translation() {
        let json = message_to_ollama(&Message::tool(r#"{"ok":true}"#));
        assert_eq!(json["role"], "tool");
        assert_eq!(json["content"], r#"{"ok":true}"#);

        let back = message_from_ollama(&json!({"role": "assistant", "content": "hi"})).unwrap();
        assert_eq!(back, Message::assistant("hi"));
        assert!(message_from_ollama(&json!({"role": "robot", "content": "hi"})).is_err());
        assert!(message_from_ollama(&json!({"role": "user"})).is_err());
    }

    #[test]
    fn test_blocks_are_flattened() {
        let msg = Message::blocks(
            Role::Assistant,
            vec![
                ContentBlock::Text {
                    text: "Looking it up.".into(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "search".into(),
                    input: json!({"q": "rust"}),
                },
            ],
        );
        assert_eq!(
            message_to_ollama(&msg)["content"],
            "Looking it up.\nsearch[{\"q\":\"rust\"}]"
        );
    }

    #[test]
    fn test_request_body_carries_options() {
        let mut options = Map::new();
        options.insert("temperature".into(), json!(0.1));
        let body = request_body(&TurnRequest {
            model: "llama3".into(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            tools: Vec::new(),
            options,
        });
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["temperature"], 0.1);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_translate_line() {
        assert_eq!(
            translate_line(r#"{"message":{"role":"assistant","content":"He"},"done":false}"#)
                .unwrap(),
            vec![StreamEvent::TextDelta { text: "He".into() }]
        );
        assert_eq!(
            translate_line(r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"length"}"#)
                .unwrap(),
            vec![StreamEvent::EndOfTurn {
                stop_reason: StopReason::MaxTokens
            }]
        );
        assert_eq!(
            translate_line(r#"{"error":"model 'nope' not found"}"#).unwrap(),
            vec![StreamEvent::Error {
                message: "model 'nope' not found".into()
            }]
        );
        assert!(translate_line("").unwrap().is_empty());
        assert!(matches!(
            translate_line("not json"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_stream_across_chunks() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"echo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"[hi]\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}",
        );
        let events: Vec<StreamEvent> = decode_ndjson_stream(stream::iter(chunks(body, 5)))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta { text: "echo".into() },
                StreamEvent::TextDelta { text: "[hi]".into() },
                StreamEvent::EndOfTurn {
                    stop_reason: StopReason::EndTurn
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_stream_stops_at_bad_line() {
        let body = "{\"message\":{\"content\":\"a\"}}\ngarbage\n{\"message\":{\"content\":\"b\"}}\n";
        let items: Vec<Result<StreamEvent, ProviderError>> =
            decode_ndjson_stream(stream::iter(chunks(body, 64))).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(StreamEvent::TextDelta { .. })));
        assert!(matches!(items[1], Err(ProviderError::InvalidResponse(_))));
    }
}
