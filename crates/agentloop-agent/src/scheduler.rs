//! StepScheduler: the decision loop
//!
//! AwaitingDecision → Deciding → (ToolDispatch | Finalizing) → AwaitingDecision | Terminal
//!
//! History is written in whole steps. The goal is committed when the Run
//! starts; each decision is committed together with its tool results once the
//! step finishes. A step interrupted by cancellation writes nothing.

use crate::config::AgentConfig;
use crate::context::ContextLease;
use crate::stream::EventSink;
use agentloop_core::{Event, Message, RunError, ToolCallRequest, ToolCallResult};
use agentloop_llm::{Decision, DecisionAccumulator, DecisionError, DecisionMaker, DecisionRequest};
use agentloop_tools::{StateAccess, ToolContext, ToolInvoker, ToolRegistry};
use futures::stream::{FuturesOrdered, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a Run is in the loop.
#[derive(Debug)]
enum StepState {
    AwaitingDecision,
    Deciding,
    ToolDispatch {
        text: String,
        calls: Vec<ToolCallRequest>,
    },
    Finalizing(String),
    Terminal(Result<String, RunError>),
}

impl StepState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingDecision => "awaiting_decision",
            Self::Deciding => "deciding",
            Self::ToolDispatch { .. } => "tool_dispatch",
            Self::Finalizing(_) => "finalizing",
            Self::Terminal(_) => "terminal",
        }
    }
}

/// One Run's moving parts, handed to the scheduler by the agent.
pub(crate) struct RunContext {
    pub id: String,
    pub lease: ContextLease,
    pub sink: EventSink,
    pub cancel: CancellationToken,
}

/// Result of a single decide-then-call step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResponse {
    /// Tool outputs joined by a blank line, or the answer text when no tool ran.
    pub response: String,
    /// Every tool call made, in call order.
    pub sources: Vec<ToolCallResult>,
}

enum AttemptError {
    Decision(DecisionError),
    Cancelled,
}

/// Decision-maker time left in one attempt.
struct DecisionBudget {
    limit: Duration,
    remaining: Duration,
}

impl DecisionBudget {
    fn new(limit: Duration) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    async fn spend<F: Future>(&mut self, fut: F) -> Result<F::Output, AttemptError> {
        let started = Instant::now();
        match tokio::time::timeout(self.remaining, fut).await {
            Ok(out) => {
                self.remaining = self.remaining.saturating_sub(started.elapsed());
                Ok(out)
            }
            Err(_) => Err(AttemptError::Decision(DecisionError::Timeout(
                self.limit.as_millis() as u64,
            ))),
        }
    }
}

pub(crate) struct StepScheduler {
    decision_maker: Arc<dyn DecisionMaker>,
    tools: Arc<ToolRegistry>,
    invoker: ToolInvoker,
    config: Arc<AgentConfig>,
}

impl StepScheduler {
    pub fn new(
        decision_maker: Arc<dyn DecisionMaker>,
        tools: Arc<ToolRegistry>,
        invoker: ToolInvoker,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            decision_maker,
            tools,
            invoker,
            config,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn decision_maker(&self) -> &Arc<dyn DecisionMaker> {
        &self.decision_maker
    }

    /// Drive a Run to its terminal event.
    pub async fn run(&self, run: RunContext, goal: String) -> Result<String, RunError> {
        let RunContext {
            id,
            lease,
            sink,
            cancel,
        } = run;
        let max_steps = self.config.run.max_steps;

        info!(run = %id, context = %lease.context_id(), max_steps, "run started");
        lease.commit(vec![Message::user(goal)]).await;

        let mut steps = 0usize;
        let mut state = StepState::AwaitingDecision;

        let outcome = loop {
            if cancel.is_cancelled() && !matches!(state, StepState::Terminal(_)) {
                state = StepState::Terminal(Err(RunError::Cancelled));
            }
            debug!(run = %id, step = steps, state = state.name(), "step");

            state = match state {
                StepState::AwaitingDecision => {
                    if steps >= max_steps {
                        warn!(run = %id, steps, "step budget exhausted");
                        StepState::Terminal(Err(RunError::Inconclusive { steps }))
                    } else {
                        steps += 1;
                        StepState::Deciding
                    }
                }

                StepState::Deciding => match self.decide(&lease, &sink, &cancel).await {
                    Ok(Decision::Answer(text)) => StepState::Finalizing(text),
                    Ok(Decision::ToolCalls { text, calls }) => StepState::ToolDispatch {
                        text,
                        calls: self.apply_call_policy(&id, calls),
                    },
                    Err(e) => StepState::Terminal(Err(e)),
                },

                StepState::ToolDispatch { text, calls } => {
                    match self.dispatch(&id, &lease, &sink, &cancel, text, calls).await {
                        Ok(_) => StepState::AwaitingDecision,
                        Err(e) => StepState::Terminal(Err(e)),
                    }
                }

                StepState::Finalizing(text) => {
                    lease.commit(vec![Message::assistant(text.clone())]).await;
                    StepState::Terminal(Ok(text))
                }

                StepState::Terminal(outcome) => break outcome,
            };
        };

        let context = lease.context_id().clone();
        drop(lease);

        let terminal = match &outcome {
            Ok(text) => {
                info!(run = %id, context = %context, steps, "run finished");
                Event::final_answer(text.clone())
            }
            Err(e) => {
                if matches!(e, RunError::Cancelled) {
                    info!(run = %id, context = %context, steps, "run cancelled");
                } else {
                    error!(run = %id, context = %context, steps, "run failed: {}", e);
                }
                Event::from(e.clone())
            }
        };
        // The consumer may already be gone; the outcome is still returned.
        let _ = sink.emit(terminal).await;
        outcome
    }

    /// One decision followed by one round of tool calls.
    pub async fn predict_and_call(&self, run: RunContext, goal: String) -> AgentResponse {
        let RunContext {
            id,
            lease,
            sink,
            cancel,
        } = run;
        lease.commit(vec![Message::user(goal)]).await;

        let decision = match self.decide(&lease, &sink, &cancel).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(run = %id, "predict_and_call failed: {}", e);
                return AgentResponse {
                    response: format!("An error occurred while running the tool: {}", e),
                    sources: Vec::new(),
                };
            }
        };

        match decision {
            Decision::Answer(text) => {
                lease.commit(vec![Message::assistant(text.clone())]).await;
                AgentResponse {
                    response: text,
                    sources: Vec::new(),
                }
            }
            Decision::ToolCalls { text, calls } => {
                let calls = self.apply_call_policy(&id, calls);
                match self.dispatch(&id, &lease, &sink, &cancel, text, calls).await {
                    Ok(sources) => AgentResponse {
                        response: sources
                            .iter()
                            .map(ToolCallResult::to_content_string)
                            .collect::<Vec<_>>()
                            .join("\n\n"),
                        sources,
                    },
                    Err(e) => AgentResponse {
                        response: format!("An error occurred while running the tool: {}", e),
                        sources: Vec::new(),
                    },
                }
            }
        }
    }

    fn request(&self, messages: Vec<Message>) -> DecisionRequest {
        DecisionRequest {
            messages,
            tools: self.tools.definitions(),
            system: self.config.run.system_prompt.clone(),
            tool_choice: self.config.run.tool_choice.clone(),
        }
    }

    fn apply_call_policy(&self, run_id: &str, mut calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
        if !self.config.run.allow_parallel_tool_calls && calls.len() > 1 {
            debug!(run = %run_id, dropped = calls.len() - 1, "parallel tool calls disabled, keeping the first");
            calls.truncate(1);
        }
        calls
    }

    /// Ask for the next action, retrying transport failures with backoff.
    async fn decide(
        &self,
        lease: &ContextLease,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Decision, RunError> {
        let request = self.request(lease.history().await);
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut forwarded = false;

            let error = match self.attempt(request.clone(), sink, cancel, &mut forwarded).await {
                Ok(decision) => return Ok(decision),
                Err(AttemptError::Cancelled) => return Err(RunError::Cancelled),
                Err(AttemptError::Decision(e)) => e,
            };

            let retries_left = attempt <= retry.max_retries;
            if !error.is_retryable() || forwarded || !retries_left {
                error!(
                    decision_maker = %self.decision_maker.name(),
                    attempt,
                    forwarded,
                    "decision failed: {}",
                    error
                );
                return Err(RunError::decision_unavailable(attempt, error.to_string()));
            }

            let floor = Duration::from_millis(error.retry_after_ms().unwrap_or(0));
            let delay = retry.backoff(attempt).max(floor);
            warn!(
                decision_maker = %self.decision_maker.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "decision failed, retrying: {}",
                error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One decision attempt under the decision timeout.
    async fn attempt(
        &self,
        request: DecisionRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
        forwarded: &mut bool,
    ) -> Result<Decision, AttemptError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            r = self.stream_decision(request, sink, cancel, forwarded) => r,
        };

        match result {
            Err(AttemptError::Decision(DecisionError::Cancelled)) if cancel.is_cancelled() => {
                Err(AttemptError::Cancelled)
            }
            r => r,
        }
    }

    /// Forward text deltas as they arrive while folding the stream into a decision.
    ///
    /// Only time spent waiting on the decision-maker counts against the
    /// decision timeout. Time blocked on a slow event consumer does not.
    async fn stream_decision(
        &self,
        request: DecisionRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
        forwarded: &mut bool,
    ) -> Result<Decision, AttemptError> {
        let mut budget = DecisionBudget::new(self.config.timeouts.decision());
        let mut stream = budget
            .spend(self.decision_maker.decide(request, cancel.clone()))
            .await?
            .map_err(AttemptError::Decision)?;

        let mut acc = DecisionAccumulator::new();
        while let Some(item) = budget.spend(stream.next()).await? {
            let delta = item.map_err(AttemptError::Decision)?;
            if let Some(text) = acc.push(delta) {
                sink.emit(Event::delta(text))
                    .await
                    .map_err(|_| AttemptError::Cancelled)?;
                *forwarded = true;
            }
        }
        Ok(acc.finish())
    }

    /// Run a decision's tool calls and commit the step.
    async fn dispatch(
        &self,
        run_id: &str,
        lease: &ContextLease,
        sink: &EventSink,
        cancel: &CancellationToken,
        text: String,
        calls: Vec<ToolCallRequest>,
    ) -> Result<Vec<ToolCallResult>, RunError> {
        let state = lease.state_access();
        let mut pending = vec![Message::assistant_with_tools(text, calls.clone())];
        let mut results = Vec::with_capacity(calls.len());

        if self.config.run.concurrent_tool_dispatch && calls.len() > 1 {
            for call in &calls {
                sink.emit(Event::tool_call_started(call)).await?;
            }
            let mut in_flight: FuturesOrdered<_> = calls
                .iter()
                .map(|call| self.invoke(run_id, call, state.clone(), cancel))
                .collect();
            while let Some(result) = in_flight.next().await {
                sink.emit(Event::from(result.clone())).await?;
                results.push(result);
            }
        } else {
            for call in &calls {
                sink.emit(Event::tool_call_started(call)).await?;
                let result = self.invoke(run_id, call, state.clone(), cancel).await;
                sink.emit(Event::from(result.clone())).await?;
                results.push(result);
                if cancel.is_cancelled() {
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            debug!(run = %run_id, "step cancelled, discarding {} pending message(s)", pending.len());
            return Err(RunError::Cancelled);
        }

        let limit = self.config.run.max_tool_output_chars;
        pending.extend(
            results
                .iter()
                .map(|r| Message::tool_result(r, truncate_output(r.to_content_string(), limit))),
        );
        lease.commit(pending).await;
        Ok(results)
    }

    async fn invoke(
        &self,
        run_id: &str,
        call: &ToolCallRequest,
        state: Arc<dyn StateAccess>,
        cancel: &CancellationToken,
    ) -> ToolCallResult {
        debug!(run = %run_id, tool = %call.tool_name, call = %call.id, "dispatching tool call");
        let ctx = ToolContext::new(call.id.clone(), run_id, state, cancel.clone());
        self.invoker
            .invoke(self.tools.get(&call.tool_name), call, ctx)
            .await
    }
}

/// Cut tool output to `limit` chars, noting the original length.
pub(crate) fn truncate_output(content: String, limit: usize) -> String {
    let total = content.chars().count();
    if total <= limit {
        return content;
    }
    let mut cut: String = content.chars().take(limit).collect();
    cut.push_str(&format!("\n[truncated, {} total chars]", total));
    cut
}
