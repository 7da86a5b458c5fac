use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};

use crate::conversation::Message;
use crate::stream::StreamEvent;
use crate::tool::ToolDefinition;

/// How a backend expresses tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCapability {
    /// Plain text only; tool calls are recovered from the text by a grammar.
    StreamingText,
    /// Native tool-use blocks in the response.
    StructuredTools,
}

/// Everything a provider needs to produce one assistant turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    /// Full history, system messages included.
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Provider-specific generation options (temperature, max_tokens, ...).
    pub options: Map<String, Value>,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Trait for LLM backends driven by the conversation loop.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the loop), not the provider.
/// Implementations live in crates/llm.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn capability(&self) -> ProviderCapability;

    /// Start streaming one assistant turn.
    async fn stream_turn(&self, request: TurnRequest) -> Result<FragmentStream, ProviderError>;

    /// Provider name for logging/debugging (e.g., "anthropic", "ollama")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    Auth,
    #[error("Stream error: {0}")]
    Stream(String),
}

/// Mock provider for testing the loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::stream::StopReason;
    use futures::{stream, StreamExt};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Script {
        Events(Vec<StreamEvent>),
        /// Yields the events, then never finishes.
        Stalled(Vec<StreamEvent>),
        Fail(ProviderError),
    }

    /// A mock provider that replays queued turns in order.
    pub struct MockProvider {
        capability: ProviderCapability,
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl MockProvider {
        pub fn new(capability: ProviderCapability) -> Self {
            Self {
                capability,
                scripts: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn streaming_text() -> Self {
            Self::new(ProviderCapability::StreamingText)
        }

        pub fn structured() -> Self {
            Self::new(ProviderCapability::StructuredTools)
        }

        fn queue(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        /// Queue a response that will be returned on the next unanswered call.
        pub fn queue_response(&self, events: Vec<StreamEvent>) {
            self.queue(Script::Events(events));
        }

        /// Queue a simple text response.
        pub fn queue_text(&self, text: &str) {
            self.queue_response(vec![
                StreamEvent::TextDelta {
                    text: text.to_string(),
                },
                StreamEvent::EndOfTurn {
                    stop_reason: StopReason::EndTurn,
                },
            ]);
        }

        /// Queue a turn that emits `events` and then hangs.
        pub fn queue_stalled(&self, events: Vec<StreamEvent>) {
            self.queue(Script::Stalled(events));
        }

        /// Queue a turn whose request fails outright.
        pub fn queue_error(&self, error: ProviderError) {
            self.queue(Script::Fail(error));
        }

        /// Requests received so far.
        pub fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        fn capability(&self) -> ProviderCapability {
            self.capability
        }

        async fn stream_turn(&self, request: TurnRequest) -> Result<FragmentStream, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Events(events)) => Ok(Box::pin(stream::iter(events.into_iter().map(Ok)))),
                Some(Script::Stalled(events)) => Ok(Box::pin(
                    stream::iter(events.into_iter().map(Ok)).chain(stream::pending()),
                )),
                Some(Script::Fail(error)) => Err(error),
                None => Ok(Box::pin(stream::iter(vec![Ok(StreamEvent::EndOfTurn {
                    stop_reason: StopReason::EndTurn,
                })]))),
            }
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
