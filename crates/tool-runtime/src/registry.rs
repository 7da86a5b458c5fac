use std::path::Path;

use orchestria_core::manifest::MANIFEST_FILE_NAME;
use orchestria_core::{
    AgentManifest, ConfigError, ManifestFile, Registry, SecretMap, SecretSource, ToolManifest,
};
use tracing::{debug, info};

use crate::tool::{ToolDefinition, ToolDescriptor};

/// Command prefix used to run Python tool entrypoints inside their checkout.
pub const DEFAULT_PYTHON_LAUNCHER: &[&str] = &["hatch", "--data-dir", ".venv", "run"];

/// The tools one agent may call, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Returns error if name already registered.
    pub fn register(&mut self, tool: ToolDescriptor) -> Result<(), ToolRegistryError> {
        if self.get(&tool.name).is_some() {
            return Err(ToolRegistryError::DuplicateName(tool.name));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// All tool definitions (for sending to the LLM).
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve an agent's `supported_tools` through `registry`.
    ///
    /// `"*"` pulls in every registered tool. A tool listed twice (for
    /// example by name and through the wildcard) is loaded once.
    pub fn load_for_agent(
        agent: &AgentManifest,
        registry: &dyn Registry,
        secrets: &dyn SecretSource,
        launcher: &[String],
    ) -> Result<Self, ConfigError> {
        let mut wanted: Vec<(String, Option<String>)> = Vec::new();
        for tool_ref in &agent.supported_tools {
            if tool_ref.is_wildcard() {
                wanted.extend(registry.all_tools()?.into_iter().map(|(name, _)| (name, None)));
                continue;
            }
            let (name, version) = tool_ref.parts().ok_or_else(|| {
                ConfigError::invalid_manifest(
                    agent.name.as_str(),
                    "supported_tools entries must be a name or a single {name: version} pair",
                )
            })?;
            wanted.push((name.to_string(), version.map(str::to_string)));
        }

        let mut tools = Self::new();
        for (name, version) in wanted {
            if tools.get(&name).is_some() {
                continue;
            }
            let dir = registry
                .tool_path(&name, version.as_deref())?
                .ok_or_else(|| ConfigError::ToolNotFound(name.clone()))?;
            let manifest = ManifestFile::load_tool(&dir.join(MANIFEST_FILE_NAME), Some(&name))?;
            let tool = descriptor_from_manifest(&manifest, &dir, secrets, launcher)?;
            debug!(agent = %agent.name, tool = %tool.name, "tool loaded");
            // Names are unique here; checked above.
            tools.tools.push(tool);
        }
        info!(agent = %agent.name, count = tools.len(), "tool catalog resolved");
        Ok(tools)
    }
}

/// Turn a tool manifest found in `dir` into a runnable descriptor.
pub fn descriptor_from_manifest(
    manifest: &ToolManifest,
    dir: &Path,
    secrets: &dyn SecretSource,
    launcher: &[String],
) -> Result<ToolDescriptor, ConfigError> {
    if manifest.language != "python" {
        return Err(ConfigError::UnsupportedToolLanguage {
            tool: manifest.name.clone(),
            language: manifest.language.clone(),
        });
    }
    let secrets = SecretMap::resolve(
        &manifest.secrets,
        secrets,
        &format!("tool '{}'", manifest.name),
    )?;
    let entrypoint = launcher
        .iter()
        .cloned()
        .chain(std::iter::once(manifest.entrypoint.clone()))
        .collect();
    Ok(ToolDescriptor {
        name: manifest.name.clone(),
        description: manifest.description.clone(),
        input_schema: manifest.inputs_schema.clone(),
        output_schema: manifest.outputs_schema.clone(),
        entrypoint,
        working_directory: dir.to_path_buf(),
        secrets,
    })
}

pub fn default_launcher() -> Vec<String> {
    DEFAULT_PYTHON_LAUNCHER.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ToolRegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
}
