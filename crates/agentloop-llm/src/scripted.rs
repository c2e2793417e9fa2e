//! ScriptedDecisionMaker - deterministic decisions for tests and demos
//!
//! Each call to `decide` pops the next behavior. Every request is recorded so
//! tests can assert on exactly what the loop sent.

use crate::provider::{DecisionError, DecisionMaker, DecisionResult, DecisionStream};
use crate::types::{DecisionDelta, DecisionRequest};
use async_stream::stream;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Size of streamed text chunks, in chars.
const CHUNK_CHARS: usize = 20;

type Responder = Arc<dyn Fn(&DecisionRequest) -> ScriptedBehavior + Send + Sync>;

/// What one scripted decision looks like.
#[derive(Clone)]
pub enum ScriptedBehavior {
    /// Stream a final answer in chunks
    Text(String),
    /// Request a single tool call
    ToolCall { name: String, args: Value },
    /// Request several tool calls in one decision
    MultiToolCall(Vec<(String, Value)>),
    /// Stream some text, then request a tool call
    TextThenTool {
        text: String,
        tool_name: String,
        tool_args: Value,
    },
    /// Tool call whose argument payload is not valid JSON
    MalformedToolCall { name: String, raw_arguments: String },
    /// Fail before producing anything
    Fail(DecisionError),
    /// Stream some text, then fail mid-stream
    FailAfterText { text: String, error: DecisionError },
    /// Never finish; only ends when cancelled
    Stall,
    /// Compute the behavior from the request
    Respond(Responder),
}

impl std::fmt::Debug for ScriptedBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::ToolCall { name, .. } => f.debug_struct("ToolCall").field("name", name).finish(),
            Self::MultiToolCall(calls) => f.debug_tuple("MultiToolCall").field(&calls.len()).finish(),
            Self::TextThenTool { tool_name, .. } => {
                f.debug_struct("TextThenTool").field("tool_name", tool_name).finish()
            }
            Self::MalformedToolCall { name, .. } => {
                f.debug_struct("MalformedToolCall").field("name", name).finish()
            }
            Self::Fail(e) => f.debug_tuple("Fail").field(e).finish(),
            Self::FailAfterText { error, .. } => f.debug_tuple("FailAfterText").field(error).finish(),
            Self::Stall => f.write_str("Stall"),
            Self::Respond(_) => f.write_str("Respond(..)"),
        }
    }
}

impl ScriptedBehavior {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            args,
        }
    }

    pub fn respond<F>(f: F) -> Self
    where
        F: Fn(&DecisionRequest) -> ScriptedBehavior + Send + Sync + 'static,
    {
        Self::Respond(Arc::new(f))
    }
}

/// A sequence of behaviors; when it runs out, `fallback` is used.
pub struct ScriptedDecisionMaker {
    behaviors: Mutex<Vec<ScriptedBehavior>>,
    fallback: ScriptedBehavior,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedDecisionMaker {
    /// Always behave the same way
    pub fn constant(behavior: ScriptedBehavior) -> Self {
        Self {
            behaviors: Mutex::new(Vec::new()),
            fallback: behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Consume behaviors in order, then answer with a fixed text
    pub fn sequence(behaviors: Vec<ScriptedBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors),
            fallback: ScriptedBehavior::Text("(scripted: sequence exhausted)".into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: ScriptedBehavior) -> Self {
        self.fallback = fallback;
        self
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Every request received so far, oldest first
    pub async fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_behavior(&self, request: &DecisionRequest) -> ScriptedBehavior {
        self.requests.lock().await.push(request.clone());

        let mut behaviors = self.behaviors.lock().await;
        let mut behavior = if behaviors.is_empty() {
            self.fallback.clone()
        } else {
            behaviors.remove(0)
        };
        drop(behaviors);

        loop {
            match behavior {
                ScriptedBehavior::Respond(f) => behavior = f(request),
                other => return other,
            }
        }
    }
}

fn scripted_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_scripted_{}", &id[..8])
}

fn chunks(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(CHUNK_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

fn tool_call_deltas(name: String, arguments: String) -> Vec<DecisionDelta> {
    let id = scripted_call_id();
    vec![
        DecisionDelta::ToolCallStart {
            id: id.clone(),
            name,
        },
        DecisionDelta::ToolCallDelta {
            id: id.clone(),
            arguments,
        },
        DecisionDelta::ToolCallEnd { id },
    ]
}

fn done(reason: &str) -> DecisionDelta {
    DecisionDelta::Done {
        stop_reason: Some(reason.to_string()),
    }
}

#[async_trait::async_trait]
impl DecisionMaker for ScriptedDecisionMaker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(
        &self,
        request: DecisionRequest,
        cancel: CancellationToken,
    ) -> DecisionResult<DecisionStream> {
        let behavior = self.next_behavior(&request).await;
        debug!(messages = request.messages.len(), "scripted decision");

        if let ScriptedBehavior::Fail(error) = behavior {
            warn!(error = %error, "scripted decision failing");
            return Err(error);
        }

        Ok(Box::pin(stream! {
            match behavior {
                ScriptedBehavior::Text(text) => {
                    for chunk in chunks(&text) {
                        yield Ok(DecisionDelta::Text(chunk));
                    }
                    yield Ok(done("end_turn"));
                }

                ScriptedBehavior::ToolCall { name, args } => {
                    for delta in tool_call_deltas(name, args.to_string()) {
                        yield Ok(delta);
                    }
                    yield Ok(done("tool_use"));
                }

                ScriptedBehavior::MultiToolCall(calls) => {
                    for (name, args) in calls {
                        for delta in tool_call_deltas(name, args.to_string()) {
                            yield Ok(delta);
                        }
                    }
                    yield Ok(done("tool_use"));
                }

                ScriptedBehavior::TextThenTool { text, tool_name, tool_args } => {
                    yield Ok(DecisionDelta::Text(text));
                    for delta in tool_call_deltas(tool_name, tool_args.to_string()) {
                        yield Ok(delta);
                    }
                    yield Ok(done("tool_use"));
                }

                ScriptedBehavior::MalformedToolCall { name, raw_arguments } => {
                    for delta in tool_call_deltas(name, raw_arguments) {
                        yield Ok(delta);
                    }
                    yield Ok(done("tool_use"));
                }

                ScriptedBehavior::FailAfterText { text, error } => {
                    yield Ok(DecisionDelta::Text(text));
                    yield Err(error);
                }

                ScriptedBehavior::Stall => {
                    cancel.cancelled().await;
                    yield Err(DecisionError::Cancelled);
                }

                ScriptedBehavior::Fail(error) => {
                    yield Err(error);
                }

                ScriptedBehavior::Respond(_) => {
                    yield Err(DecisionError::InvalidResponse("unresolved scripted responder".into()));
                }
            }
        }))
    }
}
