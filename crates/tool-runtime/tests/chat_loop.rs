//! End-to-end conversation loop scenarios.
//!
//! A mock provider replays scripted turns, a scripted operator types input,
//! and tools are real `sh` processes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{shell_tool, ScriptedOperator};
use orchestria_tool_runtime::provider::mock::MockProvider;
use orchestria_tool_runtime::runtime::INTERRUPTED_TURN_MARKER;
use orchestria_tool_runtime::{
    Agent, ContentBlock, LoopPolicy, Message, ProviderError, Role, StopReason, StreamEvent,
    ToolRegistry,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const ECHO_SCRIPT: &str = r#"echo '{"result": "hi"}'"#;

fn tools(entries: &[(&str, &str)], dir: &std::path::Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (name, script) in entries {
        registry.register(shell_tool(name, script, dir)).unwrap();
    }
    registry
}

async fn chat(agent: &mut Agent, operator: &mut ScriptedOperator) {
    tokio::time::timeout(TIMEOUT, agent.start_chat(operator))
        .await
        .expect("chat did not finish")
        .unwrap();
}

#[tokio::test]
async fn text_tool_call_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_text("echo_tool[{}]");
    provider.queue_text("done");

    let mut agent = Agent::builder("helper", "llama3.2", provider.clone())
        .with_tools(tools(&[("echo_tool", ECHO_SCRIPT)], dir.path()))
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["hello"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(
        agent.history(),
        &[
            Message::user("hello"),
            Message::assistant("echo_tool[{}]"),
            Message::tool(r#"{"result":"hi"}"#),
            Message::assistant("done"),
        ]
    );
    // The tool result went straight back to the model without prompting.
    assert_eq!(operator.reads, 2);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(operator.tool_calls, vec![("echo_tool".to_string(), "{}".to_string())]);
    assert_eq!(operator.tool_output, b"{\"result\": \"hi\"}\n");
    assert_eq!(operator.text, "echo_tool[{}]done");

    let second = &provider.requests()[1];
    assert_eq!(second.messages.last().map(|m| m.role), Some(Role::Tool));
    assert_eq!(second.model, "llama3.2");
}

#[tokio::test]
async fn structured_tool_calls_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::structured());
    provider.queue_response(vec![
        StreamEvent::TextDelta {
            text: "Running both.".into(),
        },
        StreamEvent::ToolUseStart {
            id: "t1".into(),
            name: "echo_tool".into(),
        },
        StreamEvent::ToolUseDelta {
            id: "t1".into(),
            partial_json: r#"{"n": 1}"#.into(),
        },
        StreamEvent::ToolUseEnd { id: "t1".into() },
        StreamEvent::ToolUseStart {
            id: "t2".into(),
            name: "count_tool".into(),
        },
        StreamEvent::ToolUseEnd { id: "t2".into() },
        StreamEvent::EndOfTurn {
            stop_reason: StopReason::ToolUse,
        },
    ]);
    provider.queue_text("both done");

    let mut agent = Agent::builder("helper", "claude", provider.clone())
        .with_tools(tools(
            &[("echo_tool", ECHO_SCRIPT), ("count_tool", r#"echo '{"count": 2}'"#)],
            dir.path(),
        ))
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["go"]);
    chat(&mut agent, &mut operator).await;

    let history = agent.history();
    assert_eq!(history.len(), 4);
    assert_eq!(
        history[2],
        Message::blocks(
            Role::Tool,
            vec![
                ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: r#"{"result":"hi"}"#.into(),
                    is_error: false,
                },
                ContentBlock::ToolResult {
                    tool_use_id: "t2".into(),
                    content: r#"{"count":2}"#.into(),
                    is_error: false,
                },
            ]
        )
    );
    assert_eq!(history[3], Message::assistant("both done"));
    assert_eq!(operator.tool_calls[0].1, r#"{"n":1}"#);
    assert_eq!(operator.tool_calls[1].1, "{}");
    // The catalog is offered to the model on every turn.
    assert_eq!(provider.requests()[0].tools.len(), 2);
}

#[tokio::test]
async fn interrupt_discards_partial_assistant_message() {
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_stalled(vec![StreamEvent::TextDelta {
        text: "partial".into(),
    }]);
    provider.queue_text("recovered");

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["first", "second"]).interrupt_on_first_delta();
    chat(&mut agent, &mut operator).await;

    assert_eq!(
        agent.history(),
        &[
            Message::user("first"),
            Message::assistant(INTERRUPTED_TURN_MARKER),
            Message::user("second"),
            Message::assistant("recovered"),
        ]
    );
    assert!(agent.history().iter().all(|m| !m.text().contains("partial")));
    assert_eq!(operator.errors, vec!["interrupted".to_string()]);
}

#[tokio::test]
async fn interrupt_kills_running_tool() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::structured());
    provider.queue_response(vec![
        StreamEvent::ToolUseStart {
            id: "t1".into(),
            name: "slow_tool".into(),
        },
        StreamEvent::ToolUseEnd { id: "t1".into() },
        StreamEvent::EndOfTurn {
            stop_reason: StopReason::ToolUse,
        },
    ]);
    provider.queue_text("ok");

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .with_tools(tools(&[("slow_tool", "exec sleep 30")], dir.path()))
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["go", "after"]).interrupt_on_first_tool_call();
    chat(&mut agent, &mut operator).await;

    let history = agent.history();
    assert_eq!(
        history[2],
        Message::blocks(
            Role::Tool,
            vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "Tool error: interrupted by the operator".into(),
                is_error: true,
            }]
        )
    );
    assert_eq!(history[3], Message::assistant(INTERRUPTED_TURN_MARKER));
    assert_eq!(history[4], Message::user("after"));
    assert_eq!(history[5], Message::assistant("ok"));
    assert_eq!(operator.errors, vec!["tool execution interrupted".to_string()]);
}

#[tokio::test]
async fn unknown_tool_returns_to_user() {
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_text("ghost_tool[x]");

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["hi"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(operator.errors, vec!["unknown tool 'ghost_tool'".to_string()]);
    assert_eq!(operator.reads, 2);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(
        agent.history(),
        &[Message::user("hi"), Message::assistant("ghost_tool[x]")]
    );
}

#[tokio::test]
async fn unknown_structured_tool_gets_error_result() {
    let provider = Arc::new(MockProvider::structured());
    provider.queue_response(vec![
        StreamEvent::ToolUseStart {
            id: "t9".into(),
            name: "ghost_tool".into(),
        },
        StreamEvent::ToolUseEnd { id: "t9".into() },
        StreamEvent::EndOfTurn {
            stop_reason: StopReason::ToolUse,
        },
    ]);

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["hi"]);
    chat(&mut agent, &mut operator).await;

    let last = agent.history().last().unwrap();
    assert_eq!(last.role, Role::Tool);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn tool_without_json_reports_error_to_model() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_text("quiet_tool[]");
    provider.queue_text("that failed");

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .with_tools(tools(&[("quiet_tool", "echo no json here")], dir.path()))
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["try it"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(
        agent.history()[2],
        Message::tool("Tool error: tool produced no structured output")
    );
    assert_eq!(provider.call_count(), 2);
    assert!(operator.tool_results[0].2);
}

#[tokio::test]
async fn provider_error_keeps_session_alive() {
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_error(ProviderError::Auth);
    provider.queue_text("fine now");

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["a", "b"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(operator.errors, vec!["Authentication failed".to_string()]);
    assert_eq!(
        agent.history(),
        &[
            Message::user("a"),
            Message::assistant(INTERRUPTED_TURN_MARKER),
            Message::user("b"),
            Message::assistant("fine now"),
        ]
    );
}

#[tokio::test]
async fn mid_stream_error_fragment_aborts_turn() {
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_response(vec![
        StreamEvent::TextDelta { text: "Hal".into() },
        StreamEvent::Error {
            message: "overloaded".into(),
        },
    ]);

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["a"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(agent.history(), &[Message::user("a")]);
    assert_eq!(operator.errors, vec!["Stream error: overloaded".to_string()]);
}

#[tokio::test]
async fn model_turn_timeout() {
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_stalled(Vec::new());

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .with_policy(LoopPolicy {
            model_turn_timeout: Some(Duration::from_millis(100)),
        })
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["anyone there?"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(operator.errors.len(), 1);
    assert!(operator.errors[0].contains("did not answer"));
}

#[tokio::test]
async fn blank_input_reprompts() {
    let provider = Arc::new(MockProvider::streaming_text());
    provider.queue_text("hey");

    let mut agent = Agent::builder("helper", "m", provider.clone())
        .with_system_prompt("Be brief.")
        .build()
        .unwrap();
    let mut operator = ScriptedOperator::new(&["   ", "", "hi"]);
    chat(&mut agent, &mut operator).await;

    assert_eq!(operator.reads, 4);
    assert_eq!(
        agent.history(),
        &[
            Message::system("Be brief."),
            Message::user("hi"),
            Message::assistant("hey"),
        ]
    );
    assert_eq!(provider.requests()[0].messages[0], Message::system("Be brief."));
}
