use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::conversation::{ContentBlock, Message, Role};

/// Events emitted during streaming LLM responses.
/// Provider-agnostic: translated from each wire format in the provider layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of text from the assistant
    TextDelta { text: String },
    /// Start of a tool-use block
    ToolUseStart { id: String, name: String },
    /// Incremental JSON argument data for a tool-use block
    ToolUseDelta { id: String, partial_json: String },
    /// Tool-use arguments are complete
    ToolUseEnd { id: String },
    /// The assistant turn is complete
    EndOfTurn { stop_reason: StopReason },
    /// The provider reported an error mid-stream
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Normal end of response
    EndTurn,
    /// Model wants to use tools
    ToolUse,
    /// Hit max tokens limit
    MaxTokens,
    /// Stopped by stop sequence
    StopSequence,
}

impl StopReason {
    /// Map a wire stop reason; unknown values count as a normal end.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "tool_use" => Self::ToolUse,
            "max_tokens" | "length" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::EndTurn,
        }
    }
}

#[derive(Debug)]
struct PartialToolUse {
    id: String,
    name: String,
    json: String,
}

/// Folds a turn's fragments into one assistant [`Message`].
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    text: String,
    tool_uses: Vec<PartialToolUse>,
    stop_reason: Option<StopReason>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment. Returns the text to show the operator, if any.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::TextDelta { text } => {
                self.text.push_str(&text);
                Some(text)
            }
            StreamEvent::ToolUseStart { id, name } => {
                self.tool_uses.push(PartialToolUse {
                    id,
                    name,
                    json: String::new(),
                });
                None
            }
            StreamEvent::ToolUseDelta { id, partial_json } => {
                match self.tool_uses.iter_mut().rev().find(|t| t.id == id) {
                    Some(tool_use) => tool_use.json.push_str(&partial_json),
                    None => warn!(id, "argument fragment for unknown tool use"),
                }
                None
            }
            StreamEvent::ToolUseEnd { .. } | StreamEvent::Error { .. } => None,
            StreamEvent::EndOfTurn { stop_reason } => {
                self.stop_reason = Some(stop_reason);
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// The assistant message for this turn. Plain text when no tool was
    /// requested, otherwise text and tool-use blocks in emitted order.
    pub fn into_message(self) -> Message {
        if self.tool_uses.is_empty() {
            return Message::assistant(self.text);
        }
        let mut blocks = Vec::with_capacity(self.tool_uses.len() + 1);
        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text { text: self.text });
        }
        blocks.extend(self.tool_uses.into_iter().map(|t| ContentBlock::ToolUse {
            input: parse_tool_input(&t.json),
            id: t.id,
            name: t.name,
        }));
        Message::blocks(Role::Assistant, blocks)
    }
}

/// Empty arguments mean `{}`; unparseable ones are kept verbatim as a string.
fn parse_tool_input(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
