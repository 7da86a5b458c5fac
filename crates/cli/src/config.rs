use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use orchestria_core::Config;
use orchestria_tool_runtime::registry::default_launcher;
use orchestria_tool_runtime::runner::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHUNK_SIZE};
use orchestria_tool_runtime::{LoopPolicy, RunnerSettings};

/// CLI configuration loaded from TOML file.
///
/// Unset URLs and directories fall back to the environment-derived
/// [`Config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Registry root (overrides ORCHESTRIA_HOME)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_dir: Option<PathBuf>,

    /// Ollama base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_url: Option<String>,

    /// Anthropic Messages API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_base_url: Option<String>,

    /// Command prefix used to run python tools
    #[serde(default = "default_launcher")]
    pub python_launcher: Vec<String>,

    /// Bytes per read from a tool's stdout
    #[serde(default = "default_chunk_size")]
    pub tool_chunk_size: usize,

    /// Chunks buffered between the tool reader and the terminal
    #[serde(default = "default_channel_capacity")]
    pub tool_channel_capacity: usize,

    /// Kill tools that run longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,

    /// Abandon a model turn that takes longer than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn_timeout_secs: Option<u64>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            settings_dir: None,
            ollama_url: None,
            anthropic_base_url: None,
            python_launcher: default_launcher(),
            tool_chunk_size: default_chunk_size(),
            tool_channel_capacity: default_channel_capacity(),
            tool_timeout_secs: None,
            model_turn_timeout_secs: None,
        }
    }
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/orchestria/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("orchestria");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Writes and returns the defaults if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };
        Self::load_from(&config_path)
    }

    fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?;
            Ok(config)
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            let config = Self::default();
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let toml_str = toml::to_string_pretty(&config)
                .context("failed to serialize default config")?;
            std::fs::write(config_path, toml_str).ok();
            Ok(config)
        }
    }

    /// Overlay file settings on the environment-derived config.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.settings_dir {
            config.settings_dir = dir.clone();
        }
        if let Some(url) = &self.ollama_url {
            config.ollama_url = url.clone();
        }
        if let Some(url) = &self.anthropic_base_url {
            config.anthropic_base_url = url.clone();
        }
        config
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            chunk_size: self.tool_chunk_size.max(1),
            channel_capacity: self.tool_channel_capacity.max(1),
            timeout: self.tool_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        LoopPolicy {
            model_turn_timeout: self.model_turn_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Return the sessions directory path.
    pub fn sessions_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("sessions"))
    }

    /// Ensure the sessions directory exists.
    pub fn ensure_sessions_dir() -> Result<PathBuf> {
        let dir = Self::sessions_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create sessions dir: {}", dir.display()))?;
        Ok(dir)
    }
}
