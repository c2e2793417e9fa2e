//! Error types for agentloop
//!
//! Three layers:
//! - [`ToolFailure`]: a tool call went wrong. Never fatal; fed back into history.
//! - [`RunError`]: a Run ended without an answer. Carried by the terminal `Event::Error`.
//! - [`Error`]: everything a caller of the library API can get back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("duplicate tool: {name}")]
    DuplicateTool { name: String },

    #[error("invalid tool {name}: {reason}")]
    InvalidTool { name: String, reason: String },

    #[error("context not found: {0}")]
    ContextNotFound(String),

    #[error("history rewind: context {context} has {current} messages, snapshot has {snapshot}")]
    HistoryRewind {
        context: String,
        current: usize,
        snapshot: usize,
    },

    #[error("snapshot of context {snapshot} cannot restore context {context}")]
    SnapshotMismatch { context: String, snapshot: String },

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn duplicate_tool(name: impl Into<String>) -> Self {
        Self::DuplicateTool { name: name.into() }
    }

    pub fn invalid_tool(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTool {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// The terminal run error, if this is one.
    pub fn as_run_error(&self) -> Option<&RunError> {
        match self {
            Self::Run(e) => Some(e),
            _ => None,
        }
    }
}

/// Why a Run ended without a final answer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    /// Another Run holds the context's writer lease.
    #[error("context busy: {context} is held by another run")]
    ContextBusy { context: String },

    /// The decision-maker could not be reached after all retries.
    #[error("decision unavailable after {attempts} attempt(s): {message}")]
    DecisionUnavailable { attempts: u32, message: String },

    /// Step budget exhausted. The loop gave up; nothing failed.
    #[error("inconclusive: no final answer after {steps} step(s)")]
    Inconclusive { steps: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RunError {
    pub fn context_busy(context: impl Into<String>) -> Self {
        Self::ContextBusy {
            context: context.into(),
        }
    }

    pub fn decision_unavailable(attempts: u32, message: impl Into<String>) -> Self {
        Self::DecisionUnavailable {
            attempts,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Classification of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not match the tool's schema.
    ArgumentValidation,
    /// No tool with the requested name is registered.
    UnknownTool,
    /// The capability itself failed (returned an error or panicked).
    Execution,
    /// The capability did not finish within its timeout.
    Timeout,
    /// The Run was cancelled while the call was in flight.
    Cancelled,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ArgumentValidation => "argument validation error",
            Self::UnknownTool => "unknown tool",
            Self::Execution => "tool execution error",
            Self::Timeout => "tool timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Error payload of a [`crate::ToolCallResult`].
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ArgumentValidation, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ToolErrorKind::UnknownTool, format!("Tool not found: {}", name))
    }
}
