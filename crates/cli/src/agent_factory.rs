//! Builds a ready-to-chat [`Agent`] from the registry and CLI config.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use orchestria_core::manifest::MANIFEST_FILE_NAME;
use orchestria_core::{
    AgentManifest, Config, ConfigError, EnvSecrets, FsRegistry, ManifestFile, Registry, SecretMap,
};
use orchestria_llm::create_provider;
use orchestria_tool_runtime::{Agent, AgentBuilder, Message};

use crate::config::CliConfig;

/// Pick the agent to run: the named one, or the only registered agent.
pub fn choose_agent(registry: &dyn Registry, name: Option<&str>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name.to_string());
    }
    let mut agents = registry.agents()?;
    match agents.len() {
        0 => anyhow::bail!("no agents registered; use `orchestria agent register`"),
        1 => Ok(agents.remove(0)),
        _ => anyhow::bail!(
            "several agents registered ({}); pass one by name",
            agents.join(", ")
        ),
    }
}

/// Registry version of agents created with `orchestria agent create`.
pub const LOCAL_VERSION: &str = "local";

/// Store `manifest` as a checkout under `<settings>/agents/local/<name>` and
/// register it. Returns the checkout directory.
pub fn create_agent(registry: &FsRegistry, manifest: AgentManifest) -> Result<PathBuf> {
    let name = manifest.name.clone();
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\']);
    if !valid {
        anyhow::bail!("invalid agent name '{}'", name);
    }

    let dir = registry.root().join("agents").join(LOCAL_VERSION).join(&name);
    let file = ManifestFile {
        agents: Some(vec![manifest]),
        tools: None,
    };
    file.write(&dir.join(MANIFEST_FILE_NAME))
        .with_context(|| format!("failed to store agent '{}'", name))?;
    registry.register_agent(&name, LOCAL_VERSION, &dir)?;
    info!(agent = %name, path = %dir.display(), "created agent");
    Ok(dir)
}

/// Load the agent's manifest, resolve its secrets, create its provider and
/// tool catalog. A non-empty `history` resumes a saved transcript.
pub fn build_agent(
    name: &str,
    registry: &dyn Registry,
    config: &Config,
    cli: &CliConfig,
    history: Vec<Message>,
) -> Result<Agent> {
    let dir = registry
        .agent_path(name)?
        .ok_or_else(|| ConfigError::AgentNotFound(name.to_string()))?;
    let manifest = ManifestFile::load_agent(&dir.join(MANIFEST_FILE_NAME), Some(name))
        .with_context(|| format!("failed to load agent '{}'", name))?;

    let owner = format!("agent '{}'", manifest.name);
    let secrets = SecretMap::resolve(&manifest.secrets, &EnvSecrets, &owner)?;
    let provider = create_provider(&manifest, &secrets, config)?;
    info!(
        agent = %manifest.name,
        provider = provider.provider_name(),
        model = %manifest.model,
        "creating agent"
    );

    let agent = AgentBuilder::from_manifest(
        &manifest,
        provider,
        secrets,
        registry,
        &EnvSecrets,
        &cli.python_launcher,
    )?
    .with_runner_settings(cli.runner_settings())
    .with_policy(cli.loop_policy())
    .with_history(history)
    .build()?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestria_core::MemoryRegistry;
    use std::path::PathBuf;

    fn config() -> Config {
        Config {
            settings_dir: PathBuf::from("/tmp/orchestria"),
            ollama_url: "http://localhost:11434".into(),
            anthropic_base_url: "https://api.anthropic.com".into(),
        }
    }

    #[test]
    fn test_choose_agent() {
        let empty = MemoryRegistry::new();
        assert!(choose_agent(&empty, None).is_err());
        assert_eq!(choose_agent(&empty, Some("x")).unwrap(), "x");

        let one = MemoryRegistry::new().with_agent("helper", "v1", "/a");
        assert_eq!(choose_agent(&one, None).unwrap(), "helper");

        let two = one.with_agent("other", "v1", "/b");
        let err = choose_agent(&two, None).unwrap_err();
        assert!(err.to_string().contains("helper, other"));
    }

    #[test]
    fn test_build_agent_from_checkout() {
        let agent_dir = tempfile::tempdir().unwrap();
        let tool_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            agent_dir.path().join(MANIFEST_FILE_NAME),
            r#"
agents:
  - name: helper
    model: llama3
    provider: ollama
    system_prompt: "Tools: {% for t in tools %}{{ t.name }} {% endfor %}"
    supported_tools: ["*"]
"#,
        )
        .unwrap();
        std::fs::write(
            tool_dir.path().join(MANIFEST_FILE_NAME),
            r#"
tools:
  - name: echo_tool
    description: Echoes its input
    language: python
    entrypoint: main.py
"#,
        )
        .unwrap();
        let registry = MemoryRegistry::new()
            .with_agent("helper", "v1", agent_dir.path())
            .with_tool("echo_tool", "v1", tool_dir.path());

        let agent = build_agent("helper", &registry, &config(), &CliConfig::default(), Vec::new())
            .unwrap();
        assert_eq!(agent.provider_name(), "ollama");
        assert_eq!(agent.tools().len(), 1);
        assert_eq!(agent.history()[0].text(), "Tools: echo_tool ");
    }

    #[test]
    fn test_build_agent_resumes_history() {
        let agent_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            agent_dir.path().join(MANIFEST_FILE_NAME),
            "agents:\n  - name: helper\n    model: m\n    provider: ollama\n    system_prompt: fresh\n",
        )
        .unwrap();
        let registry = MemoryRegistry::new().with_agent("helper", "v1", agent_dir.path());
        let history = vec![
            Message::system("old prompt"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let agent = build_agent("helper", &registry, &config(), &CliConfig::default(), history)
            .unwrap();
        assert_eq!(agent.history().len(), 3);
        assert_eq!(agent.history()[0].text(), "old prompt");
    }

    fn helper_manifest(name: &str) -> AgentManifest {
        AgentManifest {
            name: name.to_string(),
            description: "Answers questions".into(),
            model: "llama3".into(),
            provider: "ollama".into(),
            system_prompt: Some("You are {{ tools | length }}-tool helpful.".into()),
            supported_tools: Vec::new(),
            generation_arguments: serde_json::Map::new(),
            secrets: Default::default(),
            tool_call_format: Default::default(),
        }
    }

    #[test]
    fn test_create_agent_then_build() {
        let settings = tempfile::tempdir().unwrap();
        let registry = FsRegistry::open(settings.path()).unwrap();

        let dir = create_agent(&registry, helper_manifest("helper")).unwrap();
        assert_eq!(dir, settings.path().join("agents/local/helper"));
        assert!(dir.join(MANIFEST_FILE_NAME).exists());
        assert_eq!(registry.agent_path("helper").unwrap(), Some(dir));
        assert!(registry.index().unwrap().agents["helper"].contains_key(LOCAL_VERSION));

        let agent = build_agent("helper", &registry, &config(), &CliConfig::default(), Vec::new())
            .unwrap();
        assert_eq!(agent.name(), "helper");
        assert_eq!(agent.model(), "llama3");
        assert_eq!(agent.history()[0].text(), "You are 0-tool helpful.");
    }

    #[test]
    fn test_create_agent_rejects_path_names() {
        let settings = tempfile::tempdir().unwrap();
        let registry = FsRegistry::open(settings.path()).unwrap();
        assert!(create_agent(&registry, helper_manifest("../escape")).is_err());
        assert!(create_agent(&registry, helper_manifest("")).is_err());
        assert!(registry.agents().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_agent() {
        let registry = MemoryRegistry::new();
        let err = build_agent("ghost", &registry, &config(), &CliConfig::default(), Vec::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("ghost"));
    }
}
