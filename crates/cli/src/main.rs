mod agent_factory;
mod cli;
mod config;
mod session;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use orchestria_core::config::load_dotenv;
use orchestria_core::{Config, FsRegistry, Registry};

use crate::cli::{AgentCommand, CliArgs, Command, ToolCommand};
use crate::config::CliConfig;
use crate::session::Session;
use crate::terminal::TerminalOperator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();

    let cli_config = CliConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    let config = cli_config.apply(Config::from_env());
    config.log_summary();

    match args.command {
        Command::Sessions => {
            let dir = CliConfig::ensure_sessions_dir()?;
            terminal::print_sessions(&Session::list_all(&dir)?)?;
        }
        Command::Agent { command } => {
            let registry = open_registry(&config)?;
            match command {
                AgentCommand::Start { name, resume } => {
                    run_chat(&registry, &config, &cli_config, name, resume).await?;
                }
                AgentCommand::List => terminal::print_registry(&registry.index()?, false)?,
                AgentCommand::Create(create) => {
                    let manifest = create.into_manifest()?;
                    let name = manifest.name.clone();
                    let dir = agent_factory::create_agent(&registry, manifest)?;
                    terminal::print_info(&format!(
                        "Created agent {} in {}",
                        name,
                        dir.display()
                    ))?;
                }
                AgentCommand::Register {
                    name,
                    path,
                    version,
                } => {
                    let path = absolute(&path)?;
                    registry.register_agent(&name, &version, &path)?;
                    terminal::print_info(&format!("Registered agent {} {}", name, version))?;
                }
                AgentCommand::Remove { name, version } => {
                    registry.delete_agent(&name, &version)?;
                    terminal::print_info(&format!("Removed agent {} {}", name, version))?;
                }
            }
        }
        Command::Tool { command } => {
            let registry = open_registry(&config)?;
            match command {
                ToolCommand::List => terminal::print_registry(&registry.index()?, true)?,
                ToolCommand::Register {
                    name,
                    path,
                    version,
                } => {
                    let path = absolute(&path)?;
                    registry.register_tool(&name, &version, &path)?;
                    terminal::print_info(&format!("Registered tool {} {}", name, version))?;
                }
                ToolCommand::Remove { name, version } => {
                    registry.delete_tool(&name, &version)?;
                    terminal::print_info(&format!("Removed tool {} {}", name, version))?;
                }
            }
        }
    }

    Ok(())
}

fn open_registry(config: &Config) -> Result<FsRegistry> {
    FsRegistry::open(&config.settings_dir).with_context(|| {
        format!(
            "failed to open registry at {}",
            config.settings_dir.display()
        )
    })
}

fn absolute(path: &std::path::Path) -> Result<std::path::PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("no such directory: {}", path.display()))
}

async fn run_chat(
    registry: &dyn Registry,
    config: &Config,
    cli_config: &CliConfig,
    name: Option<String>,
    resume: Option<String>,
) -> Result<()> {
    let sessions_dir = CliConfig::ensure_sessions_dir()?;

    let resumed = match &resume {
        Some(id) => {
            info!(session = %id, "Resuming session");
            let loaded = Session::load(&sessions_dir, id)
                .with_context(|| format!("failed to load session '{}'", id))?;
            Some(loaded)
        }
        None => None,
    };

    let name = name.or_else(|| resumed.as_ref().map(|s| s.agent.clone()));
    let agent_name = agent_factory::choose_agent(registry, name.as_deref())?;
    let history = resumed
        .as_ref()
        .map(|s| s.messages.clone())
        .unwrap_or_default();

    let mut agent = agent_factory::build_agent(&agent_name, registry, config, cli_config, history)
        .with_context(|| format!("failed to start agent '{}'", agent_name))?;

    let mut session = match resumed {
        Some(session) => {
            terminal::print_info(&format!(
                "Resumed session: {} ({} messages)",
                session.id,
                session.messages.len()
            ))?;
            session
        }
        None => Session::new(
            agent.name().to_string(),
            agent.provider_name().to_string(),
            agent.model().to_string(),
        ),
    };

    terminal::print_banner(
        agent.name(),
        agent.provider_name(),
        agent.model(),
        agent.tools().len(),
    )?;

    let mut operator = TerminalOperator::new();
    let outcome = agent.start_chat(&mut operator).await;

    session.messages = agent.history().to_vec();
    match session.save(&sessions_dir) {
        Ok(_) => terminal::print_info(&format!("Session saved: {}", session.id))?,
        Err(e) => {
            warn!(error = %e, "Failed to save session");
            terminal::print_error(&format!("Failed to save session: {:#}", e))?;
        }
    }

    outcome.context("chat session failed")
}
