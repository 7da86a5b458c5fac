//! SSE decoding and content-block state tracking for the Messages streaming API.

use std::collections::HashMap;

use serde_json::Value;
use tracing::trace;

use orchestria_tool_runtime::stream::{StopReason, StreamEvent};

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Accumulates `event:` and `data:` fields until a blank line ends the event.
#[derive(Debug, Default)]
pub(super) struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Feed one line (terminator stripped). Returns an event when the line
    /// completes one.
    pub(super) fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => trace!(field, "ignoring SSE field"),
        }
        None
    }

    /// Flush a final event that was not followed by a blank line.
    pub(super) fn finish(&mut self) -> Option<SseFrame> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse { id: String },
    Other,
}

/// Maps content-block indexes to their kind so argument fragments and
/// block stops can be attributed to the right tool-use id.
#[derive(Debug, Default)]
pub(super) struct BlockTracker {
    blocks: HashMap<u64, BlockKind>,
}

impl BlockTracker {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn tool_use_id(&self, index: u64) -> Option<&str> {
        match self.blocks.get(&index) {
            Some(BlockKind::ToolUse { id }) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Translate one SSE event into zero or more [`StreamEvent`]s.
    pub(super) fn translate(&mut self, event_type: &str, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let parsed = match event_type {
            "ping" | "message_start" | "message_stop" => return events,
            _ => serde_json::from_str::<Value>(data),
        };
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!(event_type, error = %e, "unparseable SSE data");
                if event_type == "error" {
                    events.push(StreamEvent::Error {
                        message: data.to_string(),
                    });
                }
                return events;
            }
        };
        let index = parsed["index"].as_u64().unwrap_or(0);

        match event_type {
            "content_block_start" => {
                let block = &parsed["content_block"];
                match block["type"].as_str() {
                    Some("text") => {
                        self.blocks.insert(index, BlockKind::Text);
                        // Text block starting -- initial text if present
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            events.push(StreamEvent::TextDelta {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        self.blocks
                            .insert(index, BlockKind::ToolUse { id: id.clone() });
                        events.push(StreamEvent::ToolUseStart { id, name });
                    }
                    _ => {
                        self.blocks.insert(index, BlockKind::Other);
                    }
                }
            }
            "content_block_delta" => {
                let delta = &parsed["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            events.push(StreamEvent::TextDelta {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("input_json_delta") => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        match self.tool_use_id(index) {
                            Some(id) => events.push(StreamEvent::ToolUseDelta {
                                id: id.to_string(),
                                partial_json: partial.to_string(),
                            }),
                            None => trace!(index, "input delta for a non tool-use block"),
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                // Only tool-use blocks produce an end fragment.
                if let Some(id) = self.tool_use_id(index) {
                    events.push(StreamEvent::ToolUseEnd { id: id.to_string() });
                }
            }
            "message_delta" => {
                let stop_reason = parsed["delta"]["stop_reason"]
                    .as_str()
                    .map(StopReason::from_wire)
                    .unwrap_or(StopReason::EndTurn);
                events.push(StreamEvent::EndOfTurn { stop_reason });
            }
            "error" => {
                let message = parsed["error"]["message"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| data.to_string());
                events.push(StreamEvent::Error { message });
            }
            _ => {
                trace!(event_type, "ignoring unknown SSE event type");
            }
        }

        events
    }
}
