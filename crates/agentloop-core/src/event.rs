//! Progress events delivered to the caller of a Run
//!
//! Serialized form (one JSON object per event):
//!
//!   { "type": "delta", "text": "Sending..." }
//!   { "type": "tool_call_started", "id": "call_1", "tool_name": "send_hello", "arguments": {...} }
//!   { "type": "tool_call_result", "result": { "id": "call_1", ... } }
//!   { "type": "final_answer", "text": "Done." }
//!   { "type": "error", "error": { "kind": "inconclusive", "steps": 3 } }

use crate::error::RunError;
use crate::types::{ToolCallRequest, ToolCallResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Streaming text from the decision-maker, forwarded as it arrives.
    #[serde(rename = "delta")]
    Delta { text: String },

    #[serde(rename = "tool_call_started")]
    ToolCallStarted {
        id: String,
        tool_name: String,
        arguments: Value,
    },

    #[serde(rename = "tool_call_result")]
    ToolCallResult { result: ToolCallResult },

    /// Terminal: the Run produced an answer.
    #[serde(rename = "final_answer")]
    FinalAnswer { text: String },

    /// Terminal: the Run ended without an answer.
    #[serde(rename = "error")]
    Error { error: RunError },
}

impl Event {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn tool_call_started(request: &ToolCallRequest) -> Self {
        Self::ToolCallStarted {
            id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            arguments: request.arguments.clone(),
        }
    }

    pub fn final_answer(text: impl Into<String>) -> Self {
        Self::FinalAnswer { text: text.into() }
    }

    /// FinalAnswer and Error end the stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. } | Self::Error { .. })
    }

    /// Event type tag, as used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Error { .. } => "error",
        }
    }
}

impl From<ToolCallResult> for Event {
    fn from(result: ToolCallResult) -> Self {
        Self::ToolCallResult { result }
    }
}

impl From<RunError> for Event {
    fn from(error: RunError) -> Self {
        Self::Error { error }
    }
}
