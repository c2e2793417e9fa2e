//! agentloop LLM - the decision-maker interface the step loop consumes
//!
//! The runtime never talks to a model API directly. It asks a [`DecisionMaker`]
//! for the next action and reads back a stream of [`DecisionDelta`]s.

pub mod provider;
pub mod scripted;
pub mod types;

pub use provider::{DecisionError, DecisionMaker, DecisionResult, DecisionStream};
pub use scripted::{ScriptedBehavior, ScriptedDecisionMaker};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
