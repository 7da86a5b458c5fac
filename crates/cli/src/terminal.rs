use anyhow::Result;
use async_trait::async_trait;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tracing::{debug, warn};

use orchestria_core::RegistryIndex;
use orchestria_tool_runtime::Operator;

use crate::session::SessionSummary;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

const PROMPT: &str = ">>> ";
const MAX_RESULT_DISPLAY_CHARS: usize = 500;

fn paint(color: Color, text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    execute!(stdout, SetForegroundColor(color), Print(text), ResetColor)?;
    stdout.flush()
}

/// Print an error message.
pub fn print_error(msg: &str) -> Result<()> {
    paint(Colors::ERROR, &format!("Error: {}\n", msg))?;
    Ok(())
}

/// Print an info message.
pub fn print_info(msg: &str) -> Result<()> {
    paint(Colors::DIM, &format!("{}\n", msg))?;
    Ok(())
}

/// Print the startup banner.
pub fn print_banner(agent: &str, provider: &str, model: &str, tools: usize) -> Result<()> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::HEADER),
        Print(agent),
        ResetColor,
        SetForegroundColor(Colors::DIM),
        Print(format!(" | Provider: {} | Model: {} | Tools: {}\n", provider, model, tools)),
        Print("Ctrl+C interrupts the current turn. Ctrl+D ends the session.\n"),
        Print("---\n"),
        ResetColor,
    )?;
    stdout.flush()?;
    Ok(())
}

/// Print a session listing.
pub fn print_sessions(sessions: &[SessionSummary]) -> Result<()> {
    if sessions.is_empty() {
        return print_info("No saved sessions found.");
    }
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::HEADER),
        Print("Saved Sessions:\n"),
        SetForegroundColor(Colors::DIM),
        Print(format!(
            "{:<24} {:<20} {:<10} {:<20} {:<6}\n",
            "ID", "AGENT", "PROVIDER", "UPDATED", "MSGS"
        )),
        Print(format!("{}\n", "-".repeat(84))),
        ResetColor,
    )?;
    for s in sessions {
        execute!(
            stdout,
            Print(format!(
                "{:<24} {:<20} {:<10} {:<20} {:<6}\n",
                s.id,
                truncate(&s.agent, 20),
                s.provider,
                s.updated_at.format("%Y-%m-%d %H:%M"),
                s.message_count,
            )),
        )?;
    }
    stdout.flush()?;
    Ok(())
}

/// Print registered agents or tools with their versions.
pub fn print_registry(index: &RegistryIndex, tools: bool) -> Result<()> {
    let (title, entries) = if tools {
        ("Tools", &index.tools)
    } else {
        ("Agents", &index.agents)
    };
    if entries.is_empty() {
        return print_info(&format!("No {} registered.", title.to_lowercase()));
    }
    let mut stdout = io::stdout();
    execute!(
        stdout,
        SetForegroundColor(Colors::HEADER),
        Print(format!("{}:\n", title)),
        ResetColor,
    )?;
    for (name, versions) in entries {
        for (version, path) in versions {
            execute!(
                stdout,
                Print(format!("{:<24} {:<12} ", name, version)),
                SetForegroundColor(Colors::DIM),
                Print(format!("{}\n", path.display())),
                ResetColor,
            )?;
        }
    }
    stdout.flush()?;
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Interactive [`Operator`] on stdin/stdout.
///
/// Ctrl+C bumps the interrupt counter instead of killing the process.
pub struct TerminalOperator {
    lines: Lines<BufReader<Stdin>>,
    interrupts: watch::Receiver<u64>,
    spinner: Option<SpinnerHandle>,
    in_message: bool,
}

impl TerminalOperator {
    /// Must be called inside the tokio runtime; installs the Ctrl+C handler.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0u64);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Ctrl+C handler unavailable");
                    return;
                }
                debug!("interrupt requested");
                tx.send_modify(|generation| *generation += 1);
            }
        });
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            interrupts: rx,
            spinner: None,
            in_message: false,
        }
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop();
        }
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn read_input(&mut self) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print(PROMPT),
            ResetColor,
        )?;
        stdout.flush()?;

        let line = self.lines.next_line().await?;
        if line.is_none() {
            print_info("\nGoodbye.").ok();
        }
        Ok(line)
    }

    fn interrupts(&self) -> watch::Receiver<u64> {
        self.interrupts.clone()
    }

    fn show_working(&mut self) {
        self.stop_spinner();
        self.spinner = start_spinner().ok();
    }

    fn hide_working(&mut self) {
        self.stop_spinner();
    }

    fn print_delta(&mut self, text: &str) {
        self.in_message = true;
        paint(Colors::ASSISTANT_TEXT, text).ok();
    }

    fn finish_message(&mut self) {
        if self.in_message {
            paint(Colors::ASSISTANT_TEXT, "\n").ok();
            self.in_message = false;
        }
    }

    fn show_tool_call(&mut self, name: &str, argument: &str) {
        paint(Colors::TOOL_CALL, &format!("[tool: {}] {}\n", name, argument)).ok();
    }

    fn print_tool_output(&mut self, chunk: &[u8]) {
        let mut stdout = io::stdout();
        stdout.write_all(chunk).ok();
        stdout.flush().ok();
    }

    fn show_tool_result(&mut self, name: &str, content: &str, is_error: bool) {
        let color = if is_error {
            Colors::ERROR
        } else {
            Colors::TOOL_RESULT
        };
        let label = if is_error { "error" } else { "result" };
        let shown = if content.chars().count() > MAX_RESULT_DISPLAY_CHARS {
            format!(
                "{} ({} chars total)",
                truncate(content, MAX_RESULT_DISPLAY_CHARS),
                content.chars().count()
            )
        } else {
            content.to_string()
        };
        paint(color, &format!("\n  [{} {}]: {}\n", name, label, shown)).ok();
    }

    fn show_error(&mut self, message: &str) {
        self.stop_spinner();
        paint(Colors::ERROR, &format!("[error: {}]\n", message)).ok();
    }
}

impl Drop for TerminalOperator {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}

/// Draw a spinner on a background thread until stopped.
fn start_spinner() -> io::Result<SpinnerHandle> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    let handle = std::thread::spawn(move || {
        let frames = ['|', '/', '-', '\\'];
        let mut i = 0;
        while running_clone.load(Ordering::SeqCst) {
            let mut stdout = io::stdout();
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print(format!("\r{} ", frames[i % frames.len()])),
                ResetColor,
            )
            .ok();
            stdout.flush().ok();
            i += 1;
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        // Clear spinner
        let mut stdout = io::stdout();
        execute!(stdout, Print("\r  \r")).ok();
        stdout.flush().ok();
    });

    Ok(SpinnerHandle {
        running,
        thread: Some(handle),
    })
}

/// Handle to a running spinner. Drop or call stop() to terminate it.
pub struct SpinnerHandle {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SpinnerHandle {
    /// Stop the animation and wait until the line is cleared.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

impl Drop for SpinnerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
