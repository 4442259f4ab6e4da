//! Engine configuration
//!
//! Limits and tunables for the session engine: retry behavior, the
//! tool-call loop guard, attachment size caps, output mode, and the
//! generation parameters forwarded to the API client.

use crate::client::GenerationParams;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum retry attempts after the initial call (attempt 0 is free)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Maximum tool-call rounds within a single turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Per-file attachment size cap in bytes
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,

    /// Combined attachment size cap per message in bytes
    #[serde(default = "default_max_total_attachment_bytes")]
    pub max_total_attachment_bytes: usize,

    /// Whether to request streamed responses from the API client
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Decoding parameters; unset fields are omitted from requests
    #[serde(default)]
    pub generation: GenerationParams,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    100
}

fn default_max_tool_iterations() -> u32 {
    10
}

fn default_max_attachment_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_max_total_attachment_bytes() -> usize {
    24 * 1024 * 1024
}

fn default_streaming() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_tool_iterations: default_max_tool_iterations(),
            max_attachment_bytes: default_max_attachment_bytes(),
            max_total_attachment_bytes: default_max_total_attachment_bytes(),
            streaming: default_streaming(),
            generation: GenerationParams::default(),
        }
    }
}

impl EngineConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if any limit is zero or the per-file
    /// attachment cap exceeds the per-message total.
    pub fn validate(&self) -> Result<()> {
        if self.max_tool_iterations == 0 {
            return Err(
                EngineError::Config("max_tool_iterations must be greater than 0".to_string())
                    .into(),
            );
        }
        if self.initial_retry_delay_ms == 0 {
            return Err(EngineError::Config(
                "initial_retry_delay_ms must be greater than 0".to_string(),
            )
            .into());
        }
        if self.max_attachment_bytes > self.max_total_attachment_bytes {
            return Err(EngineError::Config(
                "max_attachment_bytes cannot exceed max_total_attachment_bytes".to_string(),
            )
            .into());
        }
        Ok(())
    }
}
