//! ContextStore: per-session state and message history shared across Runs
//!
//! At most one Run writes to a context at a time. A Run holds a
//! [`ContextLease`] (an owned guard on the context's writer mutex) for its
//! whole lifetime; any other write attempt while the lease is held fails with
//! `ContextBusy` instead of waiting.

use agentloop_core::{ContextId, Error, Message, Result, RunError};
use agentloop_tools::StateAccess;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Shared handle to a context. Pass it to every `run` of the session.
pub type ContextHandle = Arc<ContextStore>;

#[derive(Debug, Default)]
struct ContextState {
    state: Map<String, Value>,
    history: Vec<Message>,
}

#[derive(Debug)]
pub struct ContextStore {
    id: ContextId,
    inner: RwLock<ContextState>,
    writer: Arc<Mutex<()>>,
    /// Bumped on every committed write.
    generation: AtomicU64,
}

impl ContextStore {
    pub fn new(id: impl Into<ContextId>) -> Self {
        Self {
            id: id.into(),
            inner: RwLock::new(ContextState::default()),
            writer: Arc::new(Mutex::new(())),
            generation: AtomicU64::new(0),
        }
    }

    /// A fresh context holding a copy of the snapshot's state and history.
    pub fn from_snapshot(id: impl Into<ContextId>, snapshot: &ContextSnapshot) -> Self {
        Self {
            id: id.into(),
            inner: RwLock::new(ContextState {
                state: snapshot.state.clone(),
                history: snapshot.history.clone(),
            }),
            writer: Arc::new(Mutex::new(())),
            generation: AtomicU64::new(snapshot.generation),
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a Run currently holds the writer lease.
    pub fn is_busy(&self) -> bool {
        self.writer.try_lock().is_err()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.state.get(key).cloned()
    }

    pub async fn state(&self) -> Map<String, Value> {
        self.inner.read().await.state.clone()
    }

    pub async fn history(&self) -> Vec<Message> {
        self.inner.read().await.history.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.history.len()
    }

    /// Write a state key from outside a Run.
    pub async fn set(&self, key: impl Into<String>, value: Value) -> std::result::Result<(), RunError> {
        let _guard = self.writer.try_lock().map_err(|_| self.busy())?;
        self.write_state(key.into(), value).await;
        Ok(())
    }

    /// Append to history from outside a Run.
    pub async fn append_message(&self, message: Message) -> std::result::Result<(), RunError> {
        let _guard = self.writer.try_lock().map_err(|_| self.busy())?;
        self.commit_messages(vec![message]).await;
        Ok(())
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        let inner = self.inner.read().await;
        ContextSnapshot {
            context_id: self.id.clone(),
            state: inner.state.clone(),
            history: inner.history.clone(),
            generation: self.generation(),
            taken_at: Utc::now(),
        }
    }

    /// Bring this context up to a snapshot taken from it earlier.
    ///
    /// The snapshot must carry this context's id (`SnapshotMismatch`
    /// otherwise). History only grows: the current history must be a prefix
    /// of the snapshot's, otherwise this fails with `HistoryRewind`. State is
    /// replaced wholesale. Use [`ContextStore::from_snapshot`] to seed a
    /// different context.
    pub async fn restore(&self, snapshot: &ContextSnapshot) -> Result<()> {
        if snapshot.context_id != self.id {
            return Err(Error::SnapshotMismatch {
                context: self.id.to_string(),
                snapshot: snapshot.context_id.to_string(),
            });
        }
        let _guard = self.writer.try_lock().map_err(|_| self.busy())?;
        let mut inner = self.inner.write().await;

        let current = inner.history.len();
        if current > snapshot.history.len() || inner.history[..] != snapshot.history[..current] {
            return Err(Error::HistoryRewind {
                context: self.id.to_string(),
                current,
                snapshot: snapshot.history.len(),
            });
        }

        inner
            .history
            .extend_from_slice(&snapshot.history[current..]);
        inner.state = snapshot.state.clone();
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(
            context = %self.id,
            replayed = snapshot.history.len() - current,
            "context restored from snapshot"
        );
        Ok(())
    }

    /// Take the writer lease for a Run. Fails immediately if another Run holds it.
    pub fn try_lease(self: &Arc<Self>, run_id: &str) -> std::result::Result<ContextLease, RunError> {
        let guard = self.writer.clone().try_lock_owned().map_err(|_| self.busy())?;
        debug!(context = %self.id, run = %run_id, "lease acquired");
        Ok(ContextLease {
            store: self.clone(),
            run_id: run_id.to_string(),
            live: Arc::new(AtomicBool::new(true)),
            _guard: guard,
        })
    }

    fn busy(&self) -> RunError {
        RunError::context_busy(self.id.to_string())
    }

    async fn write_state(&self, key: String, value: Value) {
        self.inner.write().await.state.insert(key, value);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Write only while `live` is set. Checked under the state lock, so a
    /// write racing a lease release either lands before it or not at all.
    async fn write_state_if(&self, live: &AtomicBool, key: String, value: Value) -> bool {
        let mut inner = self.inner.write().await;
        if !live.load(Ordering::SeqCst) {
            return false;
        }
        inner.state.insert(key, value);
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn commit_messages(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        self.inner.write().await.history.extend(messages);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Exclusive write access to a context for one Run. Released on drop.
pub struct ContextLease {
    store: Arc<ContextStore>,
    run_id: String,
    /// Cleared on release; tool state handles stop writing after that.
    live: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl ContextLease {
    pub fn store(&self) -> &ContextHandle {
        &self.store
    }

    pub fn context_id(&self) -> &ContextId {
        self.store.id()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append a group of messages in one write. Readers see all or none.
    pub async fn commit(&self, messages: Vec<Message>) {
        self.store.commit_messages(messages).await
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.store.write_state(key.into(), value).await
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).await
    }

    pub async fn history(&self) -> Vec<Message> {
        self.store.history().await
    }

    /// State accessor handed to tools called by this Run.
    pub fn state_access(&self) -> Arc<dyn StateAccess> {
        Arc::new(LeasedState {
            store: self.store.clone(),
            run_id: self.run_id.clone(),
            live: self.live.clone(),
        })
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        debug!(context = %self.store.id, run = %self.run_id, "lease released");
    }
}

struct LeasedState {
    store: Arc<ContextStore>,
    run_id: String,
    live: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl StateAccess for LeasedState {
    async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Value) {
        if !self
            .store
            .write_state_if(&self.live, key.to_string(), value)
            .await
        {
            warn!(
                context = %self.store.id,
                run = %self.run_id,
                key,
                "state write after run ended, dropped"
            );
        }
    }

    async fn history(&self) -> Vec<Message> {
        self.store.history().await
    }
}

/// Point-in-time copy of a context, for handing to an external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub context_id: ContextId,
    pub state: Map<String, Value>,
    pub history: Vec<Message>,
    pub generation: u64,
    pub taken_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
