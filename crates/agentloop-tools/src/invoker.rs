//! ToolInvoker: runs one tool call through the contract's pipeline
//!
//! validate → before_call (approve / amend / veto) → call → after_call
//!
//! Nothing in here returns an error to the scheduler. Every failure, panics
//! included, becomes a [`ToolCallResult`] with a [`ToolFailure`] payload.

use crate::confirm::{Confirmation, ConfirmationHandler};
use crate::context::ToolContext;
use crate::registry::ToolContract;
use crate::schema::ToolArgs;
use agentloop_core::{ToolCallRequest, ToolCallResult, ToolErrorKind, ToolFailure, ToolOutput};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct ToolInvoker {
    default_timeout: Duration,
    default_confirmation: Option<Arc<dyn ConfirmationHandler>>,
}

impl Default for ToolInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolInvoker {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            default_confirmation: None,
        }
    }

    /// Handler used for contracts that carry none of their own.
    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.default_confirmation = Some(handler);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run one call. `contract` is `None` when no tool has the requested name.
    pub async fn invoke(
        &self,
        contract: Option<&ToolContract>,
        request: &ToolCallRequest,
        ctx: ToolContext,
    ) -> ToolCallResult {
        let Some(contract) = contract else {
            warn!(tool = %request.tool_name, call = %request.id, "unknown tool");
            return ToolCallResult::failure(request, ToolFailure::unknown_tool(&request.tool_name));
        };

        let args = match contract.schema().validate(&request.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %contract.name(), call = %request.id, "argument validation failed: {}", e);
                return ToolCallResult::failure(request, ToolFailure::validation(e.to_string()));
            }
        };

        let handler = contract
            .confirmation()
            .or(self.default_confirmation.as_ref())
            .cloned();

        let args = match &handler {
            Some(handler) => match self.confirm(handler, contract, request, args, &ctx).await {
                Ok(args) => args,
                Err(result) => return result,
            },
            None => args,
        };

        let timeout = contract.timeout().unwrap_or(self.default_timeout);
        let outcome = execute(contract, args, ctx, timeout).await;

        let outcome = match (&handler, outcome) {
            (_, Err(f)) if f.kind == ToolErrorKind::Cancelled => Err(f),
            (Some(handler), outcome) => handler.after_call(request, outcome).await,
            (None, outcome) => outcome,
        };

        ToolCallResult::from_request(request, outcome)
    }

    /// Pre-call hook. `Err` carries the finished result when the call must not run.
    async fn confirm(
        &self,
        handler: &Arc<dyn ConfirmationHandler>,
        contract: &ToolContract,
        request: &ToolCallRequest,
        args: ToolArgs,
        ctx: &ToolContext,
    ) -> Result<ToolArgs, ToolCallResult> {
        let verdict = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(ToolCallResult::failure(
                    request,
                    ToolFailure::new(ToolErrorKind::Cancelled, "cancelled while awaiting confirmation"),
                ));
            }
            verdict = handler.before_call(request, &args, ctx) => verdict,
        };

        match verdict {
            Confirmation::Approve => Ok(args),
            Confirmation::Amend(amended) => {
                debug!(tool = %contract.name(), call = %request.id, "arguments amended before call");
                contract
                    .schema()
                    .validate(&amended.into_value())
                    .map_err(|e| {
                        warn!(tool = %contract.name(), "amended arguments rejected: {}", e);
                        ToolCallResult::failure(
                            request,
                            ToolFailure::validation(format!("amended arguments rejected: {}", e)),
                        )
                    })
            }
            Confirmation::Veto(message) => {
                info!(tool = %contract.name(), call = %request.id, "call vetoed");
                Err(ToolCallResult::success(request, ToolOutput::Text(message)))
            }
        }
    }
}

async fn execute(
    contract: &ToolContract,
    args: ToolArgs,
    ctx: ToolContext,
    timeout: Duration,
) -> Result<ToolOutput, ToolFailure> {
    let cancel = ctx.cancel.clone();
    let started = Instant::now();
    debug!(tool = %contract.name(), call = %ctx.call_id, "executing tool");

    let call = AssertUnwindSafe(contract.tool().call(args, ctx)).catch_unwind();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(ToolFailure::new(ToolErrorKind::Cancelled, "tool call cancelled"))
        }
        res = tokio::time::timeout(timeout, call) => match res {
            Err(_) => Err(ToolFailure::new(
                ToolErrorKind::Timeout,
                format!("{} did not finish within {}ms", contract.name(), timeout.as_millis()),
            )),
            Ok(Err(panic)) => Err(ToolFailure::execution(format!(
                "tool panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(Err(e))) => Err(ToolFailure::execution(e.to_string())),
            Ok(Ok(Ok(output))) => Ok(output),
        },
    };

    match &outcome {
        Ok(_) => debug!(
            tool = %contract.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool finished"
        ),
        Err(f) => warn!(tool = %contract.name(), "tool failed: {}", f),
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
