use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use orchestria_core::{AgentManifest, SecretSpec, ToolCallFormat, ToolRef};

/// Run registered agents in an interactive terminal session.
///
/// Agents and tools are checkouts registered in the settings directory;
/// each holds a `.orchestria.yml` manifest.
#[derive(Parser, Debug)]
#[command(name = "orchestria", about = "Chat with tool-using LLM agents")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/orchestria/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage and run agents
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Manage tools
    Tool {
        #[command(subcommand)]
        command: ToolCommand,
    },
    /// List saved chat transcripts
    Sessions,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommand {
    /// Start a chat with an agent
    Start {
        /// Agent name; may be omitted when exactly one agent is registered
        name: Option<String>,

        /// Resume a saved transcript by ID or ID prefix
        #[arg(long)]
        resume: Option<String>,
    },
    /// List registered agents
    List,
    /// Write a new agent manifest into the settings directory and register it
    Create(CreateAgentArgs),
    /// Register a local agent checkout
    Register {
        name: String,
        path: PathBuf,
        #[arg(long, default_value = "latest")]
        version: String,
    },
    /// Remove an agent version from the registry
    Remove {
        name: String,
        #[arg(long, default_value = "latest")]
        version: String,
    },
}

#[derive(Args, Debug)]
pub struct CreateAgentArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long)]
    pub model: String,

    #[arg(long, value_parser = ["ollama", "anthropic"], default_value = "ollama")]
    pub provider: String,

    /// Jinja template; the tool catalog is available as `tools`
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Comma separated tool names, `*` for every registered tool
    #[arg(long, value_delimiter = ',')]
    pub supported_tools: Vec<String>,

    /// Provider options as a JSON object, e.g. '{"temperature": 0.2}'
    #[arg(long)]
    pub generation_arguments: Option<String>,
}

impl CreateAgentArgs {
    pub fn into_manifest(self) -> Result<AgentManifest> {
        let generation_arguments = match self.generation_arguments.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                .context("--generation-arguments must be a JSON object")?,
            _ => serde_json::Map::new(),
        };
        let supported_tools = self
            .supported_tools
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| ToolRef::Name(name.to_string()))
            .collect();
        Ok(AgentManifest {
            name: self.name,
            description: self.description,
            model: self.model,
            provider: self.provider,
            system_prompt: self.system_prompt.filter(|p| !p.is_empty()),
            supported_tools,
            generation_arguments,
            secrets: SecretSpec::default(),
            tool_call_format: ToolCallFormat::default(),
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum ToolCommand {
    /// List registered tools
    List,
    /// Register a local tool checkout
    Register {
        name: String,
        path: PathBuf,
        #[arg(long, default_value = "latest")]
        version: String,
    },
    /// Remove a tool version from the registry
    Remove {
        name: String,
        #[arg(long, default_value = "latest")]
        version: String,
    },
}
