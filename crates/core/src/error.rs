use std::path::PathBuf;

use thiserror::Error;

/// Configuration-time failures. Any of these is fatal to loading the agent
/// or tool it concerns, and is reported before a conversation starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("tool '{tool}' is written in '{language}', only 'python' tools are supported")]
    UnsupportedToolLanguage { tool: String, language: String },

    #[error("secret '{name}' needed by {owner} not found")]
    MissingSecret { name: String, owner: String },

    #[error("tool '{0}' not found in registry")]
    ToolNotFound(String),

    #[error("agent '{0}' not found in registry")]
    AgentNotFound(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ConfigError {
    pub fn invalid_manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the on-disk name → path index.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O error at {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("registry index {0} is corrupt: {1}")]
    Corrupt(PathBuf, serde_json::Error),

    #[error("{kind} '{name}' version '{version}' is not registered")]
    NotRegistered {
        kind: &'static str,
        name: String,
        version: String,
    },
}
