//! What a tool sees of the Run that called it

use agentloop_core::Message;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Read/write access to the calling Run's context state.
///
/// Writes go straight to the context's key/value state. History is read-only
/// here; the scheduler owns every history append.
#[async_trait::async_trait]
pub trait StateAccess: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value);
    async fn history(&self) -> Vec<Message>;
}

/// Standalone state bag, for calling tools outside a Run.
#[derive(Default)]
pub struct MemoryState {
    state: RwLock<Map<String, Value>>,
    history: Vec<Message>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: Vec<Message>) -> Self {
        Self {
            state: RwLock::default(),
            history,
        }
    }
}

#[async_trait::async_trait]
impl StateAccess for MemoryState {
    async fn get(&self, key: &str) -> Option<Value> {
        self.state.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) {
        self.state.write().await.insert(key.to_string(), value);
    }

    async fn history(&self) -> Vec<Message> {
        self.history.clone()
    }
}

/// Injected into every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub run_id: String,
    pub state: Arc<dyn StateAccess>,
    /// Fires when the Run is cancelled.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(
        call_id: impl Into<String>,
        run_id: impl Into<String>,
        state: Arc<dyn StateAccess>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            run_id: run_id.into(),
            state,
            cancel,
        }
    }

    /// A context backed by a fresh [`MemoryState`], never cancelled.
    pub fn detached(call_id: impl Into<String>) -> Self {
        Self::new(
            call_id,
            "detached",
            Arc::new(MemoryState::new()),
            CancellationToken::new(),
        )
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.state.get(key).await
    }

    pub async fn set(&self, key: &str, value: Value) {
        self.state.set(key, value).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("call_id", &self.call_id)
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
