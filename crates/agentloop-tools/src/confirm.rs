//! Human-in-the-loop hooks around a tool call

use crate::context::ToolContext;
use crate::schema::ToolArgs;
use agentloop_core::{ToolCallRequest, ToolFailure, ToolOutput};

/// Verdict of a pre-call check.
#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation {
    /// Run the call with the arguments as validated.
    Approve,
    /// Run the call with replacement arguments. They are validated again.
    Amend(ToolArgs),
    /// Skip the call. The message is recorded as the call's output.
    Veto(String),
}

/// Invoked by the tool invoker before and after the underlying capability.
///
/// `before_call` may suspend for as long as it likes (a prompt on a terminal,
/// a review queue). Only the current call waits; events already emitted for
/// the Run are still delivered.
#[async_trait::async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn before_call(
        &self,
        _request: &ToolCallRequest,
        _args: &ToolArgs,
        _ctx: &ToolContext,
    ) -> Confirmation {
        Confirmation::Approve
    }

    /// Rewrite the outcome before it enters history.
    async fn after_call(
        &self,
        _request: &ToolCallRequest,
        outcome: Result<ToolOutput, ToolFailure>,
    ) -> Result<ToolOutput, ToolFailure> {
        outcome
    }
}

pub struct AlwaysApprove;

#[async_trait::async_trait]
impl ConfirmationHandler for AlwaysApprove {}

/// Approve when a predicate holds, veto with a fixed message otherwise.
pub struct ApproveIf<F> {
    predicate: F,
    veto_message: String,
}

impl<F> ApproveIf<F>
where
    F: Fn(&ToolCallRequest, &ToolArgs) -> bool + Send + Sync,
{
    pub fn new(predicate: F, veto_message: impl Into<String>) -> Self {
        Self {
            predicate,
            veto_message: veto_message.into(),
        }
    }
}

#[async_trait::async_trait]
impl<F> ConfirmationHandler for ApproveIf<F>
where
    F: Fn(&ToolCallRequest, &ToolArgs) -> bool + Send + Sync,
{
    async fn before_call(
        &self,
        request: &ToolCallRequest,
        args: &ToolArgs,
        _ctx: &ToolContext,
    ) -> Confirmation {
        if (self.predicate)(request, args) {
            Confirmation::Approve
        } else {
            Confirmation::Veto(self.veto_message.clone())
        }
    }
}
