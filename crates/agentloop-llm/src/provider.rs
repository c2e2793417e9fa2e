//! Decision-maker trait

use crate::types::{DecisionDelta, DecisionRequest};
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Result type for decision-maker operations
pub type DecisionResult<T> = Result<T, DecisionError>;

/// Decision-maker error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecisionError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,
}

impl DecisionError {
    /// Transport-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited { .. } | Self::Timeout(_) | Self::StreamError(_)
        )
    }

    /// Minimum wait the decision-maker asked for, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Stream of deltas for one decision
pub type DecisionStream = Pin<Box<dyn Stream<Item = DecisionResult<DecisionDelta>> + Send>>;

/// The external collaborator that chooses the next action.
///
/// Streaming implementations yield text and tool-call fragments as they are
/// produced. Non-streaming ones can build a whole [`crate::Decision`] and hand
/// back [`crate::Decision::into_stream`].
#[async_trait::async_trait]
pub trait DecisionMaker: Send + Sync {
    fn name(&self) -> &str;

    /// Ask for the next action. When `cancel` fires, implementations should
    /// drop any in-flight request and end the stream with `DecisionError::Cancelled`.
    async fn decide(
        &self,
        request: DecisionRequest,
        cancel: CancellationToken,
    ) -> DecisionResult<DecisionStream>;
}
