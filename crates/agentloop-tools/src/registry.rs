//! Tool contracts and the registry that holds them
//!
//! A [`ToolContract`] is fixed at registration: name, description and
//! argument schema are captured once, together with the optional confirmation
//! handler and timeout. The registry refuses a second contract with the same
//! name.

use crate::confirm::ConfirmationHandler;
use crate::context::ToolContext;
use crate::schema::{ArgumentSchema, ToolArgs};
use agentloop_core::{Error, Result, ToolOutput};
use agentloop_llm::ToolDefinition;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Error returned by a tool's own implementation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// The Tool trait: implement this to expose a capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "search", "send_hello").
    fn name(&self) -> &str;

    /// Human-readable description sent to the decision-maker.
    fn description(&self) -> &str;

    /// Parameter descriptor. Read once, when the contract is built.
    fn schema(&self) -> ArgumentSchema;

    /// Execute with validated arguments.
    async fn call(&self, args: ToolArgs, ctx: ToolContext) -> std::result::Result<ToolOutput, ToolError>;
}

type Handler = Arc<
    dyn Fn(ToolArgs, ToolContext) -> BoxFuture<'static, std::result::Result<ToolOutput, ToolError>>
        + Send
        + Sync,
>;

/// Tool backed by a closure, produced by [`ToolContractBuilder`].
struct FnTool {
    name: String,
    description: String,
    schema: ArgumentSchema,
    handler: Handler,
}

#[async_trait::async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ArgumentSchema {
        self.schema.clone()
    }

    async fn call(&self, args: ToolArgs, ctx: ToolContext) -> std::result::Result<ToolOutput, ToolError> {
        (self.handler)(args, ctx).await
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_tool(name, "name must not be empty"));
    }
    if name.len() > 64 {
        return Err(Error::invalid_tool(name, "name longer than 64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::invalid_tool(
            name,
            "name may only contain ASCII letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}

/// Registered description of one callable capability. Immutable; cheap to clone.
#[derive(Clone)]
pub struct ToolContract {
    tool: Arc<dyn Tool>,
    name: String,
    description: String,
    schema: Arc<ArgumentSchema>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    timeout: Option<Duration>,
}

impl ToolContract {
    /// Wrap a [`Tool`] implementation.
    pub fn from_tool(tool: impl Tool + 'static) -> Result<Self> {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(tool: Arc<dyn Tool>) -> Result<Self> {
        let name = tool.name().to_string();
        check_name(&name)?;
        Ok(Self {
            description: tool.description().to_string(),
            schema: Arc::new(tool.schema()),
            name,
            tool,
            confirmation: None,
            timeout: None,
        })
    }

    pub fn builder(name: impl Into<String>) -> ToolContractBuilder {
        ToolContractBuilder::new(name)
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    /// Per-call timeout overriding the invoker's default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub fn confirmation(&self) -> Option<&Arc<dyn ConfirmationHandler>> {
        self.confirmation.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Definition as presented to the decision-maker.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(),
        }
    }
}

impl std::fmt::Debug for ToolContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContract")
            .field("name", &self.name)
            .field("params", &self.schema.params().len())
            .field("confirmation", &self.confirmation.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Build a contract from closures instead of a [`Tool`] impl.
pub struct ToolContractBuilder {
    name: String,
    description: String,
    schema: ArgumentSchema,
    handler: Option<Handler>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    timeout: Option<Duration>,
}

impl ToolContractBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema: ArgumentSchema::new(),
            handler: None,
            confirmation: None,
            timeout: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn schema(mut self, schema: ArgumentSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Asynchronous implementation.
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ToolArgs, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ToolOutput, ToolError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args, ctx| f(args, ctx).boxed()));
        self
    }

    /// Synchronous implementation. Runs on the Run's task, so keep it short.
    pub fn sync_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(ToolArgs) -> std::result::Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(move |args, _ctx| futures::future::ready(f(args)).boxed()));
        self
    }

    pub fn confirm_with(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ToolContract> {
        check_name(&self.name)?;
        let handler = self
            .handler
            .ok_or_else(|| Error::invalid_tool(&self.name, "no handler"))?;
        let tool = FnTool {
            name: self.name,
            description: self.description,
            schema: self.schema,
            handler,
        };
        let mut contract = ToolContract::from_arc(Arc::new(tool))?;
        contract.confirmation = self.confirmation;
        contract.timeout = self.timeout;
        Ok(contract)
    }
}

/// Tools available to one Agent, in registration order.
#[derive(Default, Debug)]
pub struct ToolRegistry {
    contracts: Vec<ToolContract>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract. Fails with `DuplicateTool` if the name is taken.
    pub fn register(&mut self, contract: ToolContract) -> Result<()> {
        if self.index.contains_key(contract.name()) {
            return Err(Error::duplicate_tool(contract.name()));
        }
        tracing::debug!(tool = %contract.name(), "registered tool");
        self.index
            .insert(contract.name().to_string(), self.contracts.len());
        self.contracts.push(contract);
        Ok(())
    }

    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<()> {
        self.register(ToolContract::from_tool(tool)?)
    }

    pub fn get(&self, name: &str) -> Option<&ToolContract> {
        self.index.get(name).map(|&i| &self.contracts[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions for every registered tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.contracts.iter().map(ToolContract::definition).collect()
    }

    pub fn list(&self) -> Vec<&str> {
        self.contracts.iter().map(|c| c.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolContract> {
        self.contracts.iter()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}
