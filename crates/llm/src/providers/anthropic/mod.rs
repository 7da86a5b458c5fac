//! Anthropic Messages API implementation of [`ProviderAdapter`].
//!
//! Supports streaming tool use via SSE, translating between the Messages API
//! format and the provider-agnostic [`StreamEvent`] / [`Message`] types.
//!
//! [`ProviderAdapter`]: orchestria_tool_runtime::ProviderAdapter
//! [`StreamEvent`]: orchestria_tool_runtime::StreamEvent
//! [`Message`]: orchestria_tool_runtime::Message

mod sse;
mod streaming;
mod translate;

pub use self::streaming::AnthropicProvider;
pub use self::translate::{message_from_anthropic, message_to_anthropic};

/// Secret holding the API key, looked up in the agent's secrets.
pub const API_KEY_SECRET: &str = "ANTHROPIC_API_KEY";
