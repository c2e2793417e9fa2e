//! Agent configuration
//!
//! Loaded from TOML; every section and field falls back to its default.

use agentloop_core::{Error, Result};
use agentloop_llm::ToolChoice;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Decision loop behaviour.
    #[serde(rename = "loop")]
    pub run: LoopConfig,
    /// Per-call timeouts.
    pub timeouts: TimeoutConfig,
    /// Decision-maker retry policy.
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Decision cycles allowed per Run before it ends inconclusive.
    pub max_steps: usize,
    /// Keep every tool call of a decision. When false only the first one runs.
    pub allow_parallel_tool_calls: bool,
    /// Execute a decision's tool calls concurrently. Events stay in call order.
    pub concurrent_tool_dispatch: bool,
    /// Tool output longer than this is truncated before entering history.
    pub max_tool_output_chars: usize,
    /// Events buffered between the Run and its consumer.
    pub event_buffer: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub tool_choice: ToolChoice,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            allow_parallel_tool_calls: true,
            concurrent_tool_dispatch: false,
            max_tool_output_chars: 50_000,
            event_buffer: 64,
            system_prompt: None,
            tool_choice: ToolChoice::Auto,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// One decision, including its whole stream.
    pub decision_ms: u64,
    /// One tool call, unless its contract sets its own.
    pub tool_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            decision_ms: 60_000,
            tool_ms: 120_000,
        }
    }
}

impl TimeoutConfig {
    pub fn decision(&self) -> Duration {
        Duration::from_millis(self.decision_ms)
    }

    pub fn tool(&self) -> Duration {
        Duration::from_millis(self.tool_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 20_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }
}

impl AgentConfig {
    /// Load from a TOML file. Missing or unparsable files fall back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// The effective config as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
