pub mod anthropic;
pub mod ollama;

use std::str::FromStr;
use std::sync::Arc;

use orchestria_core::{AgentManifest, Config, ConfigError, SecretMap};
use orchestria_tool_runtime::{ProviderAdapter, ProviderError};
use serde_json::Value;

/// Backends an agent manifest can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    Anthropic,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Create the provider an agent manifest asks for.
///
/// API keys come from the agent's own resolved secrets.
pub fn create_provider(
    agent: &AgentManifest,
    secrets: &SecretMap,
    config: &Config,
) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
    match agent.provider.parse::<ProviderKind>()? {
        ProviderKind::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(
            config.ollama_url.clone(),
        ))),
        ProviderKind::Anthropic => {
            let api_key = secrets
                .get(anthropic::API_KEY_SECRET)
                .ok_or_else(|| ConfigError::MissingSecret {
                    name: anthropic::API_KEY_SECRET.to_string(),
                    owner: format!("agent '{}'", agent.name),
                })?;
            Ok(Arc::new(anthropic::AnthropicProvider::new(
                api_key.to_string(),
                config.anthropic_base_url.clone(),
            )))
        }
    }
}

/// Map a non-success HTTP response to a [`ProviderError`].
pub(crate) fn error_for_status(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth,
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(30),
        },
        _ => {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v["error"]["message"]
                        .as_str()
                        .or_else(|| v["error"].as_str())
                        .map(String::from)
                })
                .unwrap_or(body);
            ProviderError::Api { status, message }
        }
    }
}

pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Splits a byte stream into lines without breaking multi-byte characters
/// that straddle chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `chunk` and return every line it completed, without the
    /// line terminator.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Trailing data with no final newline, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}
