pub mod agent;
pub mod conversation;
pub mod grammar;
pub mod operator;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod runtime;
pub mod stream;
pub mod tool;

pub use agent::{Agent, AgentBuilder, AgentError};
pub use conversation::{ContentBlock, Conversation, ConversationError, Message, MessageContent, Role};
pub use grammar::{ParsedTurn, ToolCallGrammar, ToolInvocationRequest};
pub use operator::Operator;
pub use prompt::{render_system_prompt, TemplateError};
pub use provider::{FragmentStream, ProviderAdapter, ProviderCapability, ProviderError, TurnRequest};
pub use registry::ToolRegistry;
pub use runner::{OutputFrame, OutputSink, RunnerSettings, ToolRunner};
pub use runtime::{LoopPolicy, LoopState, PendingToolCall};
pub use stream::{StopReason, StreamEvent, TurnAccumulator};
pub use tool::{ToolDefinition, ToolDescriptor, ToolError, ToolExecutionResult};
