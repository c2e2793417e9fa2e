//! Decision request/response types

use crate::provider::{DecisionResult, DecisionStream};
use agentloop_core::{new_tool_call_id, Message, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the decision-maker gets for one turn.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DecisionRequest {
    /// Full message history, oldest first.
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub tool_choice: ToolChoice,
}

impl DecisionRequest {
    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == agentloop_core::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Tool definition as presented to the decision-maker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// How the decision-maker may use tools on this turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Named(String),
}

/// Streaming delta from the decision-maker
#[derive(Clone, Debug, PartialEq)]
pub enum DecisionDelta {
    Text(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments: String },
    ToolCallEnd { id: String },
    /// A complete tool call, for decision-makers that do not stream arguments.
    ToolCall(ToolCallRequest),
    Done { stop_reason: Option<String> },
}

/// Accumulated tool call from streaming
#[derive(Clone, Debug, Default)]
pub struct AccumulatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AccumulatedToolCall {
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }

    /// Finalize into a request. Unparseable arguments are kept as a raw
    /// string so validation can report them back to the decision-maker.
    pub fn into_request(self) -> ToolCallRequest {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            self.parse_arguments()
                .unwrap_or_else(|_| Value::String(self.arguments.clone()))
        };
        let id = if self.id.is_empty() {
            new_tool_call_id()
        } else {
            self.id
        };
        ToolCallRequest::new(id, self.name, arguments)
    }
}

/// The decision-maker's choice for one turn.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Terminal: a natural-language answer.
    Answer(String),
    /// One or more tool calls, with any text produced alongside them.
    ToolCalls {
        text: String,
        calls: Vec<ToolCallRequest>,
    },
}

impl Decision {
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Answer(_) => &[],
            Self::ToolCalls { calls, .. } => calls,
        }
    }

    /// Replay a complete decision as a delta stream.
    pub fn into_stream(self) -> DecisionStream {
        let mut deltas: Vec<DecisionResult<DecisionDelta>> = Vec::new();
        let (text, calls, stop) = match self {
            Self::Answer(text) => (text, Vec::new(), "end_turn"),
            Self::ToolCalls { text, calls } => (text, calls, "tool_use"),
        };
        if !text.is_empty() {
            deltas.push(Ok(DecisionDelta::Text(text)));
        }
        deltas.extend(calls.into_iter().map(|c| Ok(DecisionDelta::ToolCall(c))));
        deltas.push(Ok(DecisionDelta::Done {
            stop_reason: Some(stop.to_string()),
        }));
        Box::pin(futures::stream::iter(deltas))
    }
}

/// Folds a delta stream into a [`Decision`].
#[derive(Debug, Default)]
pub struct DecisionAccumulator {
    text: String,
    calls: Vec<AccumulatedToolCall>,
    complete: Vec<(usize, ToolCallRequest)>,
    stop_reason: Option<String>,
}

impl DecisionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one delta. Returns text that should be forwarded to the caller.
    pub fn push(&mut self, delta: DecisionDelta) -> Option<String> {
        match delta {
            DecisionDelta::Text(text) => {
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                return Some(text);
            }
            DecisionDelta::ToolCallStart { id, name } => {
                self.calls.push(AccumulatedToolCall {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            DecisionDelta::ToolCallDelta { id, arguments } => {
                let target = match self.calls.iter().position(|c| c.id == id) {
                    Some(i) => self.calls.get_mut(i),
                    None => self.calls.last_mut(),
                };
                if let Some(call) = target {
                    call.arguments.push_str(&arguments);
                }
            }
            DecisionDelta::ToolCallEnd { .. } => {}
            DecisionDelta::ToolCall(request) => {
                // Keep whole calls ordered relative to streamed ones.
                let slot = self.calls.len() + self.complete.len();
                self.complete.push((slot, request));
            }
            DecisionDelta::Done { stop_reason } => {
                self.stop_reason = stop_reason;
            }
        }
        None
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn finish(self) -> Decision {
        let total = self.calls.len() + self.complete.len();
        let mut streamed = self.calls.into_iter().map(AccumulatedToolCall::into_request);
        let mut complete = self.complete.into_iter().peekable();
        let mut calls = Vec::with_capacity(total);
        for slot in 0..total {
            match complete.peek() {
                Some((s, _)) if *s == slot => {
                    if let Some((_, request)) = complete.next() {
                        calls.push(request);
                    }
                }
                _ => calls.extend(streamed.next()),
            }
        }

        if calls.is_empty() {
            Decision::Answer(self.text)
        } else {
            Decision::ToolCalls {
                text: self.text,
                calls,
            }
        }
    }
}
