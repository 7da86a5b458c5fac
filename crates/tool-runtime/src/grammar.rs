//! Recovering tool calls from plain assistant text.
//!
//! Models without native tool calling are asked, through the system prompt,
//! to put a call on a line of its own. Two dialects are understood:
//!
//! * bracket: `weather[{"city": "Oslo"}]`
//! * ReAct: `Action: weather[{"city": "Oslo"}]`, with `Final Answer: ...`
//!   marking a turn that needs no tool.
//!
//! When several lines match, the last one wins.

use std::sync::LazyLock;

use orchestria_core::ToolCallFormat;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BRACKET_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9_-]+)\[(.*)\]\s*$").expect("valid bracket grammar")
});

static REACT_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Action:\s*([A-Za-z0-9_-]+)\[(.*)\]\s*$").expect("valid react action grammar")
});

static REACT_FINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Final Answer:").expect("valid react final answer grammar"));

/// A tool call recognized in assistant text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    /// Everything between the brackets, trimmed, unparsed.
    pub raw_argument_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTurn {
    NoInvocation,
    Invocation(ToolInvocationRequest),
}

/// Textual tool-call dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolCallGrammar {
    #[default]
    Bracket,
    React,
}

impl From<ToolCallFormat> for ToolCallGrammar {
    fn from(format: ToolCallFormat) -> Self {
        match format {
            ToolCallFormat::Bracket => Self::Bracket,
            ToolCallFormat::React => Self::React,
        }
    }
}

impl ToolCallGrammar {
    pub fn parse(&self, text: &str) -> ParsedTurn {
        match self {
            Self::Bracket => last_match(text, &BRACKET_CALL),
            Self::React => {
                if text.lines().any(|line| REACT_FINAL.is_match(line)) {
                    ParsedTurn::NoInvocation
                } else {
                    last_match(text, &REACT_ACTION)
                }
            }
        }
    }
}

fn last_match(text: &str, pattern: &Regex) -> ParsedTurn {
    text.lines()
        .filter_map(|line| pattern.captures(line))
        .last()
        .map(|caps| {
            ParsedTurn::Invocation(ToolInvocationRequest {
                tool_name: caps[1].trim().to_string(),
                raw_argument_text: caps[2].trim().to_string(),
            })
        })
        .unwrap_or(ParsedTurn::NoInvocation)
}
