//! agentloop core - shared types, events and the error taxonomy

pub mod error;
pub mod event;
pub mod types;

pub use error::{Error, Result, RunError, ToolErrorKind, ToolFailure};
pub use event::Event;
pub use types::*;
