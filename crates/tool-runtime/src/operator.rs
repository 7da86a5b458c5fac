use std::io;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::runner::OutputSink;

/// The human on the other end of a chat session.
///
/// The loop reads input and reports progress through this trait and never
/// touches a terminal directly.
#[async_trait]
pub trait Operator: Send {
    /// Next line of input. `Ok(None)` ends the session.
    async fn read_input(&mut self) -> io::Result<Option<String>>;

    /// Interrupt generation counter. Every increment cancels the turn in
    /// progress, if any.
    fn interrupts(&self) -> watch::Receiver<u64>;

    /// Waiting for the first token.
    fn show_working(&mut self) {}

    fn hide_working(&mut self) {}

    /// Streamed assistant text, printed as it arrives.
    fn print_delta(&mut self, text: &str);

    /// The assistant message is complete.
    fn finish_message(&mut self) {}

    fn show_tool_call(&mut self, name: &str, argument: &str);

    /// Live stdout of a running tool.
    fn print_tool_output(&mut self, chunk: &[u8]);

    fn show_tool_result(&mut self, name: &str, content: &str, is_error: bool);

    fn show_error(&mut self, message: &str);
}

/// Routes tool output to an [`Operator`].
pub struct OperatorSink<'a>(pub &'a mut dyn Operator);

impl OutputSink for OperatorSink<'_> {
    fn write_chunk(&mut self, chunk: &[u8]) {
        self.0.print_tool_output(chunk);
    }
}

/// Resolves on the next interrupt. Never resolves once the sender is gone.
pub async fn interrupted(interrupts: &mut watch::Receiver<u64>) {
    if interrupts.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
