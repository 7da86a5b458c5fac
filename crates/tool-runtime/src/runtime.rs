use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError};
use crate::conversation::{ContentBlock, Message, Role};
use crate::grammar::ParsedTurn;
use crate::operator::{interrupted, Operator, OperatorSink};
use crate::provider::{ProviderCapability, ProviderError, TurnRequest};
use crate::stream::{StreamEvent, TurnAccumulator};

/// Assistant text recorded when a turn was abandoned before the model
/// answered, so the next user message does not follow another one.
pub const INTERRUPTED_TURN_MARKER: &str = "[turn interrupted]";

/// Where the conversation loop is.
///
/// Flow: User → LLM → ToolCalls → Execute → Results → LLM → ... → User
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    NeedUserInput,
    NeedModelTurn,
    HaveAssistantText,
    NeedToolExecution(Vec<PendingToolCall>),
    Terminal,
}

/// A tool call waiting to run.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    /// Tool-use block id; `None` for calls recovered from plain text.
    pub id: Option<String>,
    pub name: String,
    /// Argument text handed to the tool process.
    pub argument: String,
}

/// Limits on a single model turn.
#[derive(Debug, Clone, Default)]
pub struct LoopPolicy {
    /// Abandon a model turn that has not finished after this long.
    pub model_turn_timeout: Option<Duration>,
}

enum TurnOutcome {
    Complete(Message),
    Failed(ProviderError),
    Interrupted,
    TimedOut(Duration),
}

async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        None => Some(fut.await),
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
    }
}

impl Agent {
    /// Run the chat until the operator closes input.
    ///
    /// Provider failures, tool failures and interrupts are reported to the
    /// operator and the loop goes back to waiting for input. Only operator
    /// I/O errors end the session early.
    pub async fn start_chat(&mut self, operator: &mut dyn Operator) -> Result<(), AgentError> {
        let mut interrupts = operator.interrupts();
        let mut state = LoopState::NeedUserInput;
        info!(agent = %self.name, "chat started");
        loop {
            debug!(?state, "loop step");
            state = match state {
                LoopState::NeedUserInput => self.read_user_turn(operator).await?,
                LoopState::NeedModelTurn => self.model_turn(operator, &mut interrupts).await?,
                LoopState::HaveAssistantText => self.inspect_assistant_turn(),
                LoopState::NeedToolExecution(calls) => {
                    self.execute_tools(calls, operator, &mut interrupts).await?
                }
                LoopState::Terminal => {
                    info!(agent = %self.name, messages = self.conversation.len(), "chat ended");
                    return Ok(());
                }
            };
        }
    }

    async fn read_user_turn(&mut self, operator: &mut dyn Operator) -> Result<LoopState, AgentError> {
        loop {
            let Some(line) = operator.read_input().await? else {
                return Ok(LoopState::Terminal);
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if self.conversation.awaiting_reply() {
                self.conversation
                    .push(Message::assistant(INTERRUPTED_TURN_MARKER))?;
            }
            self.conversation.push(Message::user(text))?;
            return Ok(LoopState::NeedModelTurn);
        }
    }

    async fn model_turn(
        &mut self,
        operator: &mut dyn Operator,
        interrupts: &mut watch::Receiver<u64>,
    ) -> Result<LoopState, AgentError> {
        let request = TurnRequest {
            model: self.model.clone(),
            messages: self.conversation.messages().to_vec(),
            tools: self.tools.list(),
            options: self.options.clone(),
        };
        interrupts.borrow_and_update();
        operator.show_working();

        let outcome = {
            let turn = within(self.policy.model_turn_timeout, self.stream_turn(request, operator));
            tokio::select! {
                biased;
                _ = interrupted(interrupts) => TurnOutcome::Interrupted,
                result = turn => match result {
                    Some(Ok(message)) => TurnOutcome::Complete(message),
                    Some(Err(e)) => TurnOutcome::Failed(e),
                    None => TurnOutcome::TimedOut(self.policy.model_turn_timeout.unwrap_or_default()),
                },
            }
        };
        operator.hide_working();

        match outcome {
            TurnOutcome::Complete(message) => {
                self.conversation.push(message)?;
                Ok(LoopState::HaveAssistantText)
            }
            TurnOutcome::Failed(e) => {
                warn!(error = %e, provider = self.provider.provider_name(), "model turn failed");
                operator.finish_message();
                operator.show_error(&e.to_string());
                Ok(LoopState::NeedUserInput)
            }
            TurnOutcome::Interrupted => {
                info!("model turn interrupted");
                operator.finish_message();
                operator.show_error("interrupted");
                Ok(LoopState::NeedUserInput)
            }
            TurnOutcome::TimedOut(limit) => {
                warn!(?limit, "model turn timed out");
                operator.finish_message();
                operator.show_error(&format!("model did not answer within {limit:?}"));
                Ok(LoopState::NeedUserInput)
            }
        }
    }

    /// Stream one assistant turn, echoing text to the operator.
    async fn stream_turn(
        &self,
        request: TurnRequest,
        operator: &mut dyn Operator,
    ) -> Result<Message, ProviderError> {
        let mut stream = self.provider.stream_turn(request).await?;
        let mut turn = TurnAccumulator::new();
        let mut first_text = true;
        while let Some(event) = stream.next().await {
            let event = event?;
            if let StreamEvent::Error { message } = event {
                return Err(ProviderError::Stream(message));
            }
            if let Some(text) = turn.apply(event) {
                if first_text {
                    operator.hide_working();
                    first_text = false;
                }
                operator.print_delta(&text);
            }
            if turn.is_finished() {
                break;
            }
        }
        if !turn.is_finished() {
            warn!("stream ended without an end-of-turn marker");
        }
        debug!(stop_reason = ?turn.stop_reason(), "model turn complete");
        operator.finish_message();
        Ok(turn.into_message())
    }

    fn inspect_assistant_turn(&self) -> LoopState {
        let Some(last) = self.conversation.last() else {
            return LoopState::NeedUserInput;
        };
        let uses = last.tool_uses();
        if !uses.is_empty() {
            let calls = uses
                .into_iter()
                .map(|(id, name, input)| PendingToolCall {
                    id: Some(id.to_string()),
                    name: name.to_string(),
                    argument: argument_text(input),
                })
                .collect();
            return LoopState::NeedToolExecution(calls);
        }
        if self.provider.capability() == ProviderCapability::StreamingText {
            if let ParsedTurn::Invocation(request) = self.grammar.parse(&last.text()) {
                return LoopState::NeedToolExecution(vec![PendingToolCall {
                    id: None,
                    name: request.tool_name,
                    argument: request.raw_argument_text,
                }]);
            }
        }
        LoopState::NeedUserInput
    }

    /// Run pending calls one after another, in emitted order.
    async fn execute_tools(
        &mut self,
        calls: Vec<PendingToolCall>,
        operator: &mut dyn Operator,
        interrupts: &mut watch::Receiver<u64>,
    ) -> Result<LoopState, AgentError> {
        let mut results = Vec::with_capacity(calls.len());

        for (index, call) in calls.iter().enumerate() {
            let Some(tool) = self.tools.get(&call.name).cloned() else {
                let err = AgentError::UnknownTool(call.name.clone());
                warn!(tool = %call.name, "model requested an unknown tool");
                operator.show_error(&err.to_string());
                self.close_tool_uses(results, &calls[index..], &err.to_string())?;
                return Ok(LoopState::NeedUserInput);
            };

            interrupts.borrow_and_update();
            operator.show_tool_call(&tool.name, &call.argument);
            info!(tool = %tool.name, "running tool");

            let outcome = {
                let mut sink = OperatorSink(&mut *operator);
                let run = self.runner.run(&tool, &call.argument, &mut sink);
                tokio::select! {
                    biased;
                    _ = interrupted(interrupts) => None,
                    result = run => Some(result),
                }
            };

            let Some(outcome) = outcome else {
                info!(tool = %tool.name, "tool interrupted");
                operator.show_error("tool execution interrupted");
                self.close_tool_uses(results, &calls[index..], "interrupted by the operator")?;
                return Ok(LoopState::NeedUserInput);
            };

            let (content, is_error) = match outcome.and_then(|r| r.into_result()) {
                Ok(payload) => (payload.to_string(), false),
                Err(e) => {
                    warn!(tool = %tool.name, error = %e, "tool failed");
                    (format!("Tool error: {e}"), true)
                }
            };
            operator.show_tool_result(&tool.name, &content, is_error);

            match &call.id {
                Some(id) => results.push(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content,
                    is_error,
                }),
                None => {
                    self.conversation.push(Message::tool(content))?;
                    return Ok(LoopState::NeedModelTurn);
                }
            }
        }

        if !results.is_empty() {
            self.conversation.push(Message::blocks(Role::Tool, results))?;
        }
        Ok(LoopState::NeedModelTurn)
    }

    /// Answer every outstanding tool-use block so the transcript stays
    /// well-formed for structured providers. Text-recovered calls have no
    /// block to answer and leave the history untouched.
    fn close_tool_uses(
        &mut self,
        mut results: Vec<ContentBlock>,
        remaining: &[PendingToolCall],
        reason: &str,
    ) -> Result<(), AgentError> {
        results.extend(remaining.iter().filter_map(|call| {
            call.id.as_ref().map(|id| ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: format!("Tool error: {reason}"),
                is_error: true,
            })
        }));
        if !results.is_empty() {
            self.conversation.push(Message::blocks(Role::Tool, results))?;
        }
        Ok(())
    }
}

/// Structured tool input as the text handed to the tool process.
fn argument_text(input: &Value) -> String {
    match input {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use std::sync::Arc;

    #[test]
    fn test_argument_text() {
        assert_eq!(argument_text(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(argument_text(&Value::String("raw".into())), "raw");
    }

    fn agent_with_last(provider: MockProvider, messages: Vec<Message>) -> Agent {
        Agent::builder("a", "m", Arc::new(provider))
            .with_history(messages)
            .build()
            .unwrap()
    }

    #[test]
    fn test_inspect_text_turn_uses_grammar() {
        let agent = agent_with_last(
            MockProvider::streaming_text(),
            vec![Message::user("weather?"), Message::assistant("weather[Oslo]")],
        );
        assert_eq!(
            agent.inspect_assistant_turn(),
            LoopState::NeedToolExecution(vec![PendingToolCall {
                id: None,
                name: "weather".into(),
                argument: "Oslo".into(),
            }])
        );
    }

    #[test]
    fn test_structured_provider_ignores_text_grammar() {
        let agent = agent_with_last(
            MockProvider::structured(),
            vec![Message::user("weather?"), Message::assistant("weather[Oslo]")],
        );
        assert_eq!(agent.inspect_assistant_turn(), LoopState::NeedUserInput);
    }

    #[test]
    fn test_inspect_tool_use_blocks_in_order() {
        let agent = agent_with_last(
            MockProvider::structured(),
            vec![
                Message::user("go"),
                Message::blocks(
                    Role::Assistant,
                    vec![
                        ContentBlock::ToolUse {
                            id: "t1".into(),
                            name: "first".into(),
                            input: serde_json::json!({"x": 1}),
                        },
                        ContentBlock::ToolUse {
                            id: "t2".into(),
                            name: "second".into(),
                            input: serde_json::json!({}),
                        },
                    ],
                ),
            ],
        );
        let LoopState::NeedToolExecution(calls) = agent.inspect_assistant_turn() else {
            panic!("expected tool execution");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id.as_deref(), Some("t1"));
        assert_eq!(calls[0].argument, r#"{"x":1}"#);
        assert_eq!(calls[1].name, "second");
    }
}
