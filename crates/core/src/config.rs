use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Environment-derived settings shared by every entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the registry index and cloned checkouts.
    pub settings_dir: PathBuf,
    /// Base URL of the Ollama server used by streaming-text agents.
    pub ollama_url: String,
    /// Base URL of the Anthropic Messages API.
    pub anthropic_base_url: String,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// `ORCHESTRIA_HOME` overrides the settings directory, which otherwise
    /// defaults to `~/.orchestria`.
    pub fn from_env() -> Self {
        let settings_dir = env_opt("ORCHESTRIA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_settings_dir);
        Self {
            settings_dir,
            ollama_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            anthropic_base_url: env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            settings_dir = %self.settings_dir.display(),
            ollama_url = %self.ollama_url,
            anthropic_base_url = %self.anthropic_base_url,
            "config loaded"
        );
    }
}

fn default_settings_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orchestria")
}
