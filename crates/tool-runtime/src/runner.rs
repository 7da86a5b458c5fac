//! Tool process execution.
//!
//! A tool is an external program. Its stdout is read in small chunks by one
//! future, handed over a bounded channel, and written to the operator by a
//! second future while a third waits for the process to exit. The last line
//! of the captured output is expected to carry the JSON result.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::tool::{ToolDescriptor, ToolError, ToolExecutionResult};

pub const DEFAULT_CHUNK_SIZE: usize = 8;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Unit of transfer between the stdout reader and the drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Chunk(Bytes),
    /// Reader finished; nothing follows.
    Closed,
}

/// Destination for live tool output.
pub trait OutputSink: Send {
    fn write_chunk(&mut self, chunk: &[u8]);

    fn finish(&mut self) {}
}

impl OutputSink for Vec<u8> {
    fn write_chunk(&mut self, chunk: &[u8]) {
        self.extend_from_slice(chunk);
    }
}

/// Discards output.
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write_chunk(&mut self, _chunk: &[u8]) {}
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Bytes requested per stdout read.
    pub chunk_size: usize,
    /// Frames buffered between reader and drain before the reader waits.
    pub channel_capacity: usize,
    /// Kill the tool after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    settings: RunnerSettings,
}

impl ToolRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `tool` with `argument` as its final argv element.
    ///
    /// Only a failure to start the process is returned as `Err`. Everything
    /// after that (read errors, timeouts, missing JSON) is reported in
    /// [`ToolExecutionResult::error`] alongside whatever output was captured.
    /// Dropping the returned future kills the tool and everything it started.
    pub async fn run(
        &self,
        tool: &ToolDescriptor,
        argument: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<ToolExecutionResult, ToolError> {
        let spawn_error = |source: io::Error| ToolError::Spawn {
            tool: tool.name.clone(),
            source,
        };
        let (program, fixed_args) = tool.entrypoint.split_first().ok_or_else(|| {
            spawn_error(io::Error::new(io::ErrorKind::InvalidInput, "empty entrypoint"))
        })?;

        let mut command = Command::new(program);
        command
            .args(fixed_args)
            .arg(sanitize_argument(argument))
            .current_dir(&tool.working_directory)
            .envs(tool.secrets.iter())
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if std::env::var_os("FORCE_COLOR").is_none() {
            command.env("FORCE_COLOR", "1");
        }

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(spawn_error)?;
        info!(tool = %tool.name, pid = ?child.id(), "tool started");
        let mut group = ProcessGroup { id: child.id() };
        let mut stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))
        })?;

        let chunk_size = self.settings.chunk_size.max(1);
        let (tx, mut rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let reader = async move {
            let mut buf = vec![0u8; chunk_size];
            let outcome = loop {
                let read = tokio::select! {
                    biased;
                    Ok(()) = stop_rx.changed() => break Ok(()),
                    read = stdout.read(&mut buf) => read,
                };
                match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        let frame = OutputFrame::Chunk(Bytes::copy_from_slice(&buf[..n]));
                        if tx.send(frame).await.is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => break Err(e),
                }
            };
            let _ = tx.send(OutputFrame::Closed).await;
            let _ = done_tx.send(());
            outcome
        };

        let drain = async {
            let mut captured = Vec::new();
            while let Some(frame) = rx.recv().await {
                match frame {
                    OutputFrame::Chunk(bytes) => {
                        sink.write_chunk(&bytes);
                        captured.extend_from_slice(&bytes);
                    }
                    OutputFrame::Closed => break,
                }
            }
            sink.finish();
            captured
        };

        // The run is over once the process has exited and stdout is closed.
        // Helpers that inherited stdout keep it open, so the timeout covers both.
        let timeout = self.settings.timeout;
        let wait = async {
            let finished = async {
                let status = child.wait().await;
                let _ = done_rx.await;
                status
            };
            match timeout {
                None => finished.await.map(Some),
                Some(limit) => {
                    let outcome = tokio::time::timeout(limit, finished).await;
                    match outcome {
                        Ok(status) => status.map(Some),
                        Err(_) => {
                            warn!(tool = %tool.name, ?limit, "tool timed out, killing");
                            group.kill();
                            // Fails when the tool already exited and only a helper lingered.
                            if let Err(e) = child.kill().await {
                                debug!(tool = %tool.name, error = %e, "tool process already gone");
                            }
                            stop_tx.send_replace(true);
                            Ok(None)
                        }
                    }
                }
            }
        };

        let (status, read_outcome, stdout) = tokio::join!(wait, reader, drain);
        if matches!(status, Ok(Some(_))) {
            group.release();
        }

        let mut error = None;
        let exit_code = match status {
            Ok(Some(status)) => status.code(),
            Ok(None) => {
                error = timeout.map(ToolError::Timeout);
                None
            }
            Err(e) => {
                error = Some(ToolError::Stream(e.to_string()));
                None
            }
        };
        if let (None, Err(e)) = (&error, read_outcome) {
            error = Some(ToolError::Stream(e.to_string()));
        }
        if let Some(code) = exit_code.filter(|c| *c != 0) {
            warn!(tool = %tool.name, code, "tool exited with non-zero status");
        }

        let payload = extract_trailing_json(&stdout);
        if error.is_none() && payload.is_none() {
            error = Some(ToolError::NoStructuredOutput);
        }
        debug!(tool = %tool.name, bytes = stdout.len(), ?exit_code, "tool finished");

        Ok(ToolExecutionResult {
            exit_code,
            stdout,
            payload,
            error,
        })
    }
}

/// The tool's process group. Killing it also stops whatever the tool started,
/// such as the interpreter behind a launcher. Killed on drop unless released.
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(id) = self.id.take() {
            kill_process_group(id);
        }
    }

    /// The tool exited on its own; its group id may be reused.
    fn release(&mut self) {
        self.id = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(id: u32) {
    let status = std::process::Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{id}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if !status.success() => debug!(pgid = id, "process group already gone"),
        Ok(_) => debug!(pgid = id, "process group killed"),
        Err(e) => warn!(pgid = id, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_id: u32) {}

/// Prepare a model-supplied argument for the tool's argv.
///
/// Unescaped single quotes become double quotes, so Python-style dict
/// literals read as JSON, and braces are doubled because tools format the
/// argument into templates. Applied exactly once per call.
pub fn sanitize_argument(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut previous = None;
    for c in raw.chars() {
        match c {
            '\'' if previous != Some('\\') => out.push('"'),
            '{' => out.push_str("{{"),
            '}' => out.push_str("}}"),
            other => out.push(other),
        }
        previous = Some(c);
    }
    out
}

/// Undo the brace doubling of [`sanitize_argument`].
pub fn restore_braces(sanitized: &str) -> String {
    sanitized.replace("{{", "{").replace("}}", "}")
}

/// Parse the JSON value at the end of the last output line.
///
/// Tries every suffix of the trimmed line, longest first, so a prefix such
/// as a log tag or a progress bar before the JSON is skipped.
pub fn extract_trailing_json(output: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().last()?.trim();
    line.char_indices()
        .find_map(|(i, _)| serde_json::from_str::<Value>(&line[i..]).ok())
}
