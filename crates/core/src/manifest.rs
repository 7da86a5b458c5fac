//! YAML manifest schema for agents and tools.
//!
//! A checkout carries a single `.orchestria.yml` listing any number of agents
//! and tools. Secrets are referenced by environment variable name or given
//! literally; they are resolved later by [`crate::secrets`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// File name of the manifest at the root of every agent/tool checkout.
pub const MANIFEST_FILE_NAME: &str = ".orchestria.yml";

// ── Top-level file ────────────────────────────────────────────────

/// Parsed contents of a manifest file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentManifest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolManifest>>,
}

impl ManifestFile {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&content, path)
    }

    /// Write the file as YAML, creating missing parent directories.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
        }
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::invalid_manifest(path, e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::invalid_manifest(path, e.to_string()))
    }

    /// Load one agent from the manifest at `path`.
    ///
    /// `name` may be omitted only when the file declares a single agent.
    pub fn load_agent(path: &Path, name: Option<&str>) -> Result<AgentManifest, ConfigError> {
        let file = Self::read(path)?;
        let agents = file
            .agents
            .ok_or_else(|| ConfigError::invalid_manifest(path, "no agents found"))?;
        select_entry(agents, name, path, "agent", |a| &a.name)
    }

    /// Load one tool from the manifest at `path`.
    ///
    /// `name` may be omitted only when the file declares a single tool.
    pub fn load_tool(path: &Path, name: Option<&str>) -> Result<ToolManifest, ConfigError> {
        let file = Self::read(path)?;
        let tools = file
            .tools
            .ok_or_else(|| ConfigError::invalid_manifest(path, "no tools found"))?;
        select_entry(tools, name, path, "tool", |t| &t.name)
    }
}

fn select_entry<T>(
    entries: Vec<T>,
    name: Option<&str>,
    path: &Path,
    kind: &str,
    name_of: impl Fn(&T) -> &String,
) -> Result<T, ConfigError> {
    match name {
        None => {
            let mut iter = entries.into_iter();
            match (iter.next(), iter.next()) {
                (Some(only), None) => Ok(only),
                (None, _) => Err(ConfigError::invalid_manifest(
                    path,
                    format!("no {kind}s declared"),
                )),
                _ => Err(ConfigError::invalid_manifest(
                    path,
                    format!("multiple {kind}s in file, a name must be provided"),
                )),
            }
        }
        Some(wanted) => entries
            .into_iter()
            .find(|e| name_of(e) == wanted)
            .ok_or_else(|| {
                ConfigError::invalid_manifest(path, format!("{kind} '{wanted}' not found"))
            }),
    }
}

// ── Agent ─────────────────────────────────────────────────────────

/// Agent configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Model identifier passed to the provider, e.g. `llama3.2`.
    pub model: String,

    /// Backend that serves the model: `ollama` or `anthropic`.
    pub provider: String,

    /// Jinja template rendered with the tool catalog as `tools`.
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub supported_tools: Vec<ToolRef>,

    /// Free-form options forwarded to the provider (temperature, max_tokens, ...).
    #[serde(default)]
    pub generation_arguments: serde_json::Map<String, Value>,

    #[serde(default)]
    pub secrets: SecretSpec,

    /// Textual tool-call dialect for providers without native tool calling.
    #[serde(default)]
    pub tool_call_format: ToolCallFormat,
}

/// How a streaming-text model is expected to phrase tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallFormat {
    /// `name[argument]` on its own line.
    #[default]
    Bracket,
    /// `Action: name[argument]` / `Final Answer: ...`.
    React,
}

/// Entry of `supported_tools`: a bare name, `{name: version}`, or `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolRef {
    Name(String),
    Versioned(BTreeMap<String, String>),
}

impl ToolRef {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, ToolRef::Name(n) if n == "*")
    }

    /// Name and optional pinned version. `None` for a malformed versioned
    /// entry (zero or several keys).
    pub fn parts(&self) -> Option<(&str, Option<&str>)> {
        match self {
            ToolRef::Name(name) => Some((name.as_str(), None)),
            ToolRef::Versioned(map) if map.len() == 1 => map
                .iter()
                .next()
                .map(|(name, version)| (name.as_str(), Some(version.as_str()))),
            ToolRef::Versioned(_) => None,
        }
    }
}

/// Secrets a manifest needs: names to look up, or literal values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretSpec {
    Names(Vec<String>),
    Values(BTreeMap<String, String>),
}

impl Default for SecretSpec {
    fn default() -> Self {
        SecretSpec::Names(Vec::new())
    }
}

impl SecretSpec {
    pub fn names(&self) -> Vec<&str> {
        match self {
            SecretSpec::Names(names) => names.iter().map(String::as_str).collect(),
            SecretSpec::Values(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

// ── Tool ──────────────────────────────────────────────────────────

/// Tool descriptor file entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Runtime the tool is written in; only `python` is runnable.
    pub language: String,

    /// Script the launcher runs, relative to the checkout.
    pub entrypoint: String,

    #[serde(default = "empty_object", alias = "input_schema")]
    pub inputs_schema: Value,

    #[serde(default = "empty_object", alias = "output_schema")]
    pub outputs_schema: Value,

    #[serde(default)]
    pub secrets: SecretSpec,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
