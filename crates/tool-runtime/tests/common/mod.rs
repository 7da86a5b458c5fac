//! Shared fixtures: a scripted operator and shell-backed tools.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use orchestria_core::SecretMap;
use orchestria_tool_runtime::{Operator, ToolDescriptor};
use tokio::sync::watch;

/// Replays canned input lines and records everything shown to it.
pub struct ScriptedOperator {
    inputs: VecDeque<String>,
    pub reads: usize,
    pub text: String,
    pub tool_output: Vec<u8>,
    pub tool_calls: Vec<(String, String)>,
    pub tool_results: Vec<(String, String, bool)>,
    pub errors: Vec<String>,
    interrupt_tx: watch::Sender<u64>,
    interrupt_on_delta: bool,
    interrupt_on_tool_call: bool,
}

impl ScriptedOperator {
    pub fn new(inputs: &[&str]) -> Self {
        let (interrupt_tx, _) = watch::channel(0);
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            reads: 0,
            text: String::new(),
            tool_output: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            errors: Vec::new(),
            interrupt_tx,
            interrupt_on_delta: false,
            interrupt_on_tool_call: false,
        }
    }

    /// Press Ctrl+C on the first streamed text.
    pub fn interrupt_on_first_delta(mut self) -> Self {
        self.interrupt_on_delta = true;
        self
    }

    /// Press Ctrl+C as soon as a tool starts.
    pub fn interrupt_on_first_tool_call(mut self) -> Self {
        self.interrupt_on_tool_call = true;
        self
    }

    fn interrupt(&self) {
        self.interrupt_tx.send_modify(|generation| *generation += 1);
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn read_input(&mut self) -> io::Result<Option<String>> {
        self.reads += 1;
        Ok(self.inputs.pop_front())
    }

    fn interrupts(&self) -> watch::Receiver<u64> {
        self.interrupt_tx.subscribe()
    }

    fn print_delta(&mut self, text: &str) {
        self.text.push_str(text);
        if std::mem::take(&mut self.interrupt_on_delta) {
            self.interrupt();
        }
    }

    fn show_tool_call(&mut self, name: &str, argument: &str) {
        self.tool_calls.push((name.to_string(), argument.to_string()));
        if std::mem::take(&mut self.interrupt_on_tool_call) {
            self.interrupt();
        }
    }

    fn print_tool_output(&mut self, chunk: &[u8]) {
        self.tool_output.extend_from_slice(chunk);
    }

    fn show_tool_result(&mut self, name: &str, content: &str, is_error: bool) {
        self.tool_results
            .push((name.to_string(), content.to_string(), is_error));
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

/// A tool that runs `script` with `sh -c` inside `dir`.
pub fn shell_tool(name: &str, script: &str, dir: &Path) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: format!("{name} test tool"),
        input_schema: serde_json::json!({"type": "object"}),
        output_schema: serde_json::json!({}),
        entrypoint: vec!["sh".into(), "-c".into(), script.into()],
        working_directory: dir.to_path_buf(),
        secrets: SecretMap::default(),
    }
}
