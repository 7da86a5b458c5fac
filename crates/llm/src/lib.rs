pub mod providers;

pub use providers::anthropic::AnthropicProvider;
pub use providers::ollama::OllamaProvider;
pub use providers::{create_provider, ProviderKind};
