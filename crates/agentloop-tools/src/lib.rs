//! Agentloop Tools - contracts, argument schemas and the invoker
//!
//! Register capabilities as [`ToolContract`]s in a [`ToolRegistry`]; the
//! scheduler hands each requested call to a [`ToolInvoker`].

pub mod confirm;
pub mod context;
pub mod invoker;
pub mod registry;
pub mod schema;

pub use confirm::{AlwaysApprove, ApproveIf, Confirmation, ConfirmationHandler};
pub use context::{MemoryState, StateAccess, ToolContext};
pub use invoker::{ToolInvoker, DEFAULT_TOOL_TIMEOUT};
pub use registry::{Tool, ToolContract, ToolContractBuilder, ToolError, ToolRegistry};
pub use schema::{ArgumentSchema, ParamSpec, ParamType, SchemaError, ToolArgs};
