//! Core types for agentloop

use crate::error::ToolFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Context identifier - cheaply cloneable
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContextId(Arc<str>);

impl ContextId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    /// Fresh random id (`ctx-<uuid>`).
    pub fn generate() -> Self {
        Self::new(format!("ctx-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<ContextId> for String {
    fn from(id: ContextId) -> Self {
        id.0.to_string()
    }
}

/// Short random id for one Run, used in logs.
pub fn new_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..12])
}

/// Tool-call id for decision-makers that do not supply their own.
pub fn new_tool_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..12])
}

/// Message role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a context's message history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that requested one or more tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Tool message carrying the (possibly truncated) outcome of a call.
    pub fn tool_result(result: &ToolCallResult, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(result.id.clone()),
            tool_name: Some(result.tool_name.clone()),
            is_error: result.is_error(),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// A tool call chosen by the decision-maker for one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub tool_name: String,
    /// Raw arguments as produced by the decision-maker. Not yet validated.
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Successful tool output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

/// Outcome of one dispatched tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: Result<ToolOutput, ToolFailure>,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, output: ToolOutput) -> Self {
        Self::from_request(request, Ok(output))
    }

    pub fn failure(request: &ToolCallRequest, failure: ToolFailure) -> Self {
        Self::from_request(request, Err(failure))
    }

    pub fn from_request(request: &ToolCallRequest, outcome: Result<ToolOutput, ToolFailure>) -> Self {
        Self {
            id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            arguments: request.arguments.clone(),
            outcome,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn error(&self) -> Option<&ToolFailure> {
        self.outcome.as_ref().err()
    }

    /// Text fed back to the decision-maker.
    pub fn to_content_string(&self) -> String {
        match &self.outcome {
            Ok(output) => output.to_content_string(),
            Err(failure) => format!("Error: {}", failure),
        }
    }
}
