use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use orchestria_core::SecretMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes a tool's interface for LLM consumption.
/// Maps to the `tools` array of structured-tool providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "weather", "echo_tool")
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// A runnable tool as resolved for one agent.
///
/// Immutable after construction. Each agent owns its own copy, secrets
/// included.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    /// Program followed by its fixed arguments. The model's argument is
    /// appended as one more argv element.
    pub entrypoint: Vec<String>,
    /// Checkout directory the process runs in.
    pub working_directory: PathBuf,
    /// Values of the secrets this tool declares, and nothing else.
    pub secrets: SecretMap,
}

impl ToolDescriptor {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Failure of a single tool run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start tool '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool produced no structured output")]
    NoStructuredOutput,
    #[error("error reading tool output: {0}")]
    Stream(String),
    #[error("tool timed out after {0:?}")]
    Timeout(Duration),
}

/// Everything observed while running a tool process.
#[derive(Debug)]
pub struct ToolExecutionResult {
    /// `None` when the process was killed or its status could not be read.
    pub exit_code: Option<i32>,
    /// Raw stdout, in order.
    pub stdout: Vec<u8>,
    /// JSON value recovered from the last line of stdout.
    pub payload: Option<Value>,
    pub error: Option<ToolError>,
}

impl ToolExecutionResult {
    /// Payload on success, otherwise the error that prevented one.
    pub fn into_result(self) -> Result<Value, ToolError> {
        match (self.payload, self.error) {
            (_, Some(err)) => Err(err),
            (Some(payload), None) => Ok(payload),
            (None, None) => Err(ToolError::NoStructuredOutput),
        }
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}
