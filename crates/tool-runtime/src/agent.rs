use std::sync::Arc;

use orchestria_core::{AgentManifest, ConfigError, Registry, SecretMap, SecretSource};
use serde_json::{Map, Value};
use tracing::info;

use crate::conversation::{Conversation, ConversationError, Message};
use crate::grammar::ToolCallGrammar;
use crate::prompt::{render_system_prompt, TemplateError};
use crate::provider::{ProviderAdapter, ProviderCapability};
use crate::registry::ToolRegistry;
use crate::runner::{RunnerSettings, ToolRunner};
use crate::runtime::LoopPolicy;
use crate::tool::ToolDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),
    #[error("operator I/O error: {0}")]
    Operator(#[from] std::io::Error),
}

/// A configured model plus its tools and history.
///
/// Everything but the history is fixed at construction. The history only
/// grows, and only [`Agent::start_chat`] grows it.
pub struct Agent {
    pub(crate) name: String,
    pub(crate) provider: Arc<dyn ProviderAdapter>,
    pub(crate) model: String,
    pub(crate) tools: ToolRegistry,
    pub(crate) options: Map<String, Value>,
    pub(crate) secrets: SecretMap,
    pub(crate) grammar: ToolCallGrammar,
    pub(crate) conversation: Conversation,
    pub(crate) runner: ToolRunner,
    pub(crate) policy: LoopPolicy,
}

impl Agent {
    pub fn builder(
        name: impl Into<String>,
        model: impl Into<String>,
        provider: Arc<dyn ProviderAdapter>,
    ) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            model: model.into(),
            provider,
            tools: ToolRegistry::new(),
            system_prompt: None,
            options: Map::new(),
            secrets: SecretMap::default(),
            grammar: ToolCallGrammar::default(),
            history: Vec::new(),
            runner: RunnerSettings::default(),
            policy: LoopPolicy::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn capability(&self) -> ProviderCapability {
        self.provider.capability()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        self.tools.descriptors()
    }

    pub fn secrets(&self) -> &SecretMap {
        &self.secrets
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}

pub struct AgentBuilder {
    name: String,
    model: String,
    provider: Arc<dyn ProviderAdapter>,
    tools: ToolRegistry,
    system_prompt: Option<String>,
    options: Map<String, Value>,
    secrets: SecretMap,
    grammar: ToolCallGrammar,
    history: Vec<Message>,
    runner: RunnerSettings,
    policy: LoopPolicy,
}

impl AgentBuilder {
    /// Start from an agent manifest: resolves the tool catalog through
    /// `registry` and copies prompt, options and tool-call dialect.
    ///
    /// `secrets` are the agent's already-resolved secrets; each tool's own
    /// secrets are looked up in `source`.
    pub fn from_manifest(
        manifest: &AgentManifest,
        provider: Arc<dyn ProviderAdapter>,
        secrets: SecretMap,
        registry: &dyn Registry,
        source: &dyn SecretSource,
        launcher: &[String],
    ) -> Result<Self, ConfigError> {
        let tools = ToolRegistry::load_for_agent(manifest, registry, source, launcher)?;
        let mut builder = Agent::builder(&manifest.name, &manifest.model, provider)
            .with_tools(tools)
            .with_options(manifest.generation_arguments.clone())
            .with_secrets(secrets)
            .with_grammar(manifest.tool_call_format.into());
        if let Some(template) = &manifest.system_prompt {
            builder = builder.with_system_prompt(template.clone());
        }
        Ok(builder)
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// System prompt template, rendered with the tool catalog at build time.
    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_prompt = Some(template.into());
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_secrets(mut self, secrets: SecretMap) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_grammar(mut self, grammar: ToolCallGrammar) -> Self {
        self.grammar = grammar;
        self
    }

    /// Resume from an earlier transcript instead of starting fresh.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_runner_settings(mut self, settings: RunnerSettings) -> Self {
        self.runner = settings;
        self
    }

    pub fn with_policy(mut self, policy: LoopPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let conversation = if self.history.is_empty() {
            let mut conversation = Conversation::new();
            if let Some(template) = &self.system_prompt {
                let prompt = render_system_prompt(template, self.tools.descriptors())?;
                conversation.push(Message::system(prompt))?;
            }
            conversation
        } else {
            Conversation::from_messages(self.history)?
        };
        info!(
            agent = %self.name,
            model = %self.model,
            provider = self.provider.provider_name(),
            tools = self.tools.len(),
            history = conversation.len(),
            "agent ready"
        );
        Ok(Agent {
            name: self.name,
            provider: self.provider,
            model: self.model,
            tools: self.tools,
            options: self.options,
            secrets: self.secrets,
            grammar: self.grammar,
            conversation,
            runner: ToolRunner::new(self.runner),
            policy: self.policy,
        })
    }
}
