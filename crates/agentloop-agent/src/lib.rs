//! Agentloop Agent - decision loop, shared contexts and event streams

pub mod agent;
pub mod config;
pub mod context;
pub mod scheduler;
pub mod stream;

pub use agent::{Agent, AgentBuilder, RunHandle};
pub use config::{AgentConfig, LoopConfig, RetryConfig, TimeoutConfig};
pub use context::{ContextHandle, ContextLease, ContextSnapshot, ContextStore};
pub use scheduler::AgentResponse;
pub use stream::EventStream;

pub use agentloop_core::{ContextId, Event, Message, Role, RunError, ToolCallRequest, ToolCallResult};
