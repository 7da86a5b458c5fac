//! [`ProviderAdapter`] trait implementation for the Messages streaming API.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use orchestria_tool_runtime::{
    FragmentStream, ProviderAdapter, ProviderCapability, ProviderError, StreamEvent, TurnRequest,
};

use super::sse::{BlockTracker, SseDecoder};
use super::translate::{message_to_anthropic, split_system, tool_definition_to_anthropic};
use crate::providers::{error_for_status, retry_after_secs, LineBuffer};

pub(super) const API_VERSION: &str = "2023-06-01";
pub(super) const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Anthropic provider with streaming tool-use support.
///
/// Uses the Messages API (`/v1/messages`) with `stream: true` to emit
/// incremental [`StreamEvent`]s that the conversation loop can consume.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `base_url` - API base URL (e.g. `"https://api.anthropic.com"`)
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Request body for one streamed turn.
///
/// `max_tokens` defaults to 1024. Other generation options are copied into
/// the body as-is and may override anything but the conversation itself.
pub(super) fn request_body(request: &TurnRequest) -> Value {
    let (system, messages) = split_system(&request.messages);
    let api_messages: Vec<Value> = messages.into_iter().map(message_to_anthropic).collect();
    let api_tools: Vec<Value> = request.tools.iter().map(tool_definition_to_anthropic).collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": DEFAULT_MAX_TOKENS,
    });
    if let Value::Object(map) = &mut body {
        for (key, value) in &request.options {
            map.insert(key.clone(), value.clone());
        }
        map.insert("messages".into(), Value::Array(api_messages));
        map.insert("stream".into(), Value::Bool(true));
        if !api_tools.is_empty() {
            map.insert("tools".into(), Value::Array(api_tools));
        }
        if let Some(system) = system {
            map.insert("system".into(), Value::String(system));
        }
    }
    body
}

/// Turn the raw SSE byte stream into fragments.
pub(super) fn decode_event_stream<S, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + 'static,
{
    type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

    struct State<E> {
        bytes: ByteStream<E>,
        lines: LineBuffer,
        sse: SseDecoder,
        tracker: BlockTracker,
        pending: VecDeque<StreamEvent>,
        finished: bool,
    }

    impl<E> State<E> {
        fn feed(&mut self, line: &str) {
            if let Some(frame) = self.sse.feed_line(line) {
                let events = self.tracker.translate(&frame.event, &frame.data);
                self.pending.extend(events);
            }
        }
    }

    let state = State {
        bytes: Box::pin(bytes),
        lines: LineBuffer::default(),
        sse: SseDecoder::new(),
        tracker: BlockTracker::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            // First, drain any pending events
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        state.feed(&line);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ProviderError::Stream(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    if let Some(line) = state.lines.finish() {
                        state.feed(&line);
                    }
                    if let Some(frame) = state.sse.finish() {
                        let events = state.tracker.translate(&frame.event, &frame.data);
                        state.pending.extend(events);
                    }
                }
            }
        }
    });

    Box::pin(events)
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn capability(&self) -> ProviderCapability {
        ProviderCapability::StructuredTools
    }

    async fn stream_turn(&self, request: TurnRequest) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = request_body(&request);

        debug!(model = %request.model, url = %url, tools = request.tools.len(), "starting Anthropic streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body_text = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), retry_after, body_text));
        }

        Ok(decode_event_stream(response.bytes_stream()))
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}
