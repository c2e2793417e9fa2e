//! Agent: the caller-facing API
//!
//! ```ignore
//! let agent = Agent::builder(decision_maker).tool(send_hello)?.build();
//! let ctx = agent.new_context();
//! let mut run = agent.run("Send hello to Karen", Some(&ctx))?;
//! let mut events = run.stream_events();
//! while let Some(event) = events.next().await { /* ... */ }
//! let answer = run.await?;
//! ```

use crate::config::AgentConfig;
use crate::context::{ContextHandle, ContextSnapshot, ContextStore};
use crate::scheduler::{AgentResponse, RunContext, StepScheduler};
use crate::stream::{EventSink, EventStream};
use agentloop_core::{new_run_id, ContextId, Error, Result, RunError};
use agentloop_llm::DecisionMaker;
use agentloop_tools::{ConfirmationHandler, ToolContract, ToolInvoker, ToolRegistry};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

pub struct AgentBuilder {
    decision_maker: Arc<dyn DecisionMaker>,
    tools: ToolRegistry,
    config: AgentConfig,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
}

impl AgentBuilder {
    /// Register a tool. Fails with `DuplicateTool` if the name is taken.
    pub fn tool(mut self, contract: ToolContract) -> Result<Self> {
        self.tools.register(contract)?;
        Ok(self)
    }

    /// Replace the whole tool set.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Confirmation handler for tools that do not carry their own.
    pub fn confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn build(self) -> Agent {
        let mut invoker = ToolInvoker::new(self.config.timeouts.tool());
        if let Some(handler) = self.confirmation {
            invoker = invoker.with_confirmation(handler);
        }
        let config = Arc::new(self.config);
        info!(
            decision_maker = %self.decision_maker.name(),
            tools = self.tools.len(),
            "agent ready"
        );
        Agent {
            scheduler: Arc::new(StepScheduler::new(
                self.decision_maker,
                Arc::new(self.tools),
                invoker,
                config.clone(),
            )),
            contexts: DashMap::new(),
            config,
        }
    }
}

/// Accepts goals and runs the decision loop against a context.
pub struct Agent {
    scheduler: Arc<StepScheduler>,
    contexts: DashMap<ContextId, ContextHandle>,
    config: Arc<AgentConfig>,
}

impl Agent {
    pub fn builder(decision_maker: Arc<dyn DecisionMaker>) -> AgentBuilder {
        AgentBuilder {
            decision_maker,
            tools: ToolRegistry::new(),
            config: AgentConfig::default(),
            confirmation: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.scheduler.tools()
    }

    pub fn decision_maker(&self) -> &Arc<dyn DecisionMaker> {
        self.scheduler.decision_maker()
    }

    /// Start a Run for `goal`. Without a context a fresh one is created.
    ///
    /// The writer lease is taken before this returns, so a second `run` on
    /// the same context fails here with `ContextBusy`. Must be called from
    /// within a tokio runtime.
    pub fn run(&self, goal: impl Into<String>, context: Option<&ContextHandle>) -> Result<RunHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RunError::internal(format!("no tokio runtime: {}", e)))?;

        let context = self.resolve_context(context);
        let run_id = new_run_id();
        let lease = context.try_lease(&run_id)?;

        let cancel = CancellationToken::new();
        let (sink, events) = EventStream::channel(self.config.run.event_buffer, cancel.clone());
        let run = RunContext {
            id: run_id.clone(),
            lease,
            sink,
            cancel: cancel.clone(),
        };

        let scheduler = self.scheduler.clone();
        let goal = goal.into();
        let span = tracing::info_span!("run", run = %run_id, context = %context.id());
        let join = runtime.spawn(async move { scheduler.run(run, goal).await }.instrument(span));

        Ok(RunHandle {
            run_id,
            context,
            events: Some(events),
            join,
            cancel,
        })
    }

    /// Decide once, call the chosen tools once, and return their outputs.
    pub async fn predict_and_call(
        &self,
        goal: impl Into<String>,
        context: Option<&ContextHandle>,
    ) -> Result<AgentResponse> {
        let context = self.resolve_context(context);
        let run_id = new_run_id();
        let lease = context.try_lease(&run_id)?;
        let run = RunContext {
            id: run_id.clone(),
            lease,
            sink: EventSink::detached(),
            cancel: CancellationToken::new(),
        };
        let span = tracing::info_span!("predict_and_call", run = %run_id, context = %context.id());
        Ok(self
            .scheduler
            .predict_and_call(run, goal.into())
            .instrument(span)
            .await)
    }

    /// Create and register a fresh context.
    pub fn new_context(&self) -> ContextHandle {
        let context = Arc::new(ContextStore::new(ContextId::generate()));
        self.contexts.insert(context.id().clone(), context.clone());
        info!(context = %context.id(), "context created");
        context
    }

    pub fn context(&self, id: &ContextId) -> Option<ContextHandle> {
        self.contexts.get(id).map(|c| c.value().clone())
    }

    /// Ids of every registered context.
    pub fn contexts(&self) -> Vec<ContextId> {
        let mut ids: Vec<ContextId> = self.contexts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Forget a context. Refused while a Run holds it.
    pub fn discard_context(&self, id: &ContextId) -> Result<ContextHandle> {
        let context = self
            .context(id)
            .ok_or_else(|| Error::ContextNotFound(id.to_string()))?;
        if context.is_busy() {
            return Err(RunError::context_busy(id.to_string()).into());
        }
        self.contexts.remove(id);
        info!(context = %id, "context discarded");
        Ok(context)
    }

    /// Resume from a snapshot in a new context.
    pub fn context_from_snapshot(&self, snapshot: &ContextSnapshot) -> ContextHandle {
        let context = Arc::new(ContextStore::from_snapshot(ContextId::generate(), snapshot));
        self.contexts.insert(context.id().clone(), context.clone());
        info!(
            context = %context.id(),
            source = %snapshot.context_id,
            messages = snapshot.history.len(),
            "context created from snapshot"
        );
        context
    }

    fn resolve_context(&self, context: Option<&ContextHandle>) -> ContextHandle {
        match context {
            Some(context) => self
                .contexts
                .entry(context.id().clone())
                .or_insert_with(|| context.clone())
                .value()
                .clone(),
            None => self.new_context(),
        }
    }
}

/// A Run in progress.
///
/// Take the events with [`RunHandle::stream_events`], or just `.await` the
/// handle for the final answer. When the events were taken, keep consuming
/// them while awaiting: a full event buffer holds the Run back.
pub struct RunHandle {
    run_id: String,
    context: ContextHandle,
    events: Option<EventStream>,
    join: JoinHandle<std::result::Result<String, RunError>>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.run_id
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// The Run's event stream. Later calls get an already-finished stream.
    pub fn stream_events(&mut self) -> EventStream {
        self.events.take().unwrap_or_else(EventStream::finished)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl IntoFuture for RunHandle {
    type Output = std::result::Result<String, RunError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            if let Some(mut events) = self.events {
                while events.next().await.is_some() {}
            }
            match self.join.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(RunError::Cancelled),
                Err(e) => Err(RunError::internal(format!("run task failed: {}", e))),
            }
        }
        .boxed()
    }
}
