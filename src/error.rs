//! Error types for Palaver
//!
//! This module defines all error types used throughout the engine,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Palaver operations
///
/// This enum encompasses the full failure taxonomy of the session engine:
/// transport and server failures (retryable), client and policy failures
/// (terminal), stream and loop-guard failures, cancellation, and the
/// storage/serialization errors raised at the persistence boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network-level failure before an HTTP-equivalent status was obtained
    #[error("Network failure: {0}")]
    Network(String),

    /// Server-side failure (HTTP-equivalent 5xx)
    #[error("Server error {status}: {message}")]
    Server {
        /// HTTP-equivalent status code
        status: u16,
        /// Server-provided error description
        message: String,
    },

    /// Client-side failure (HTTP-equivalent 4xx): malformed request, auth, quota
    #[error("Client error {status}: {message}")]
    Client {
        /// HTTP-equivalent status code
        status: u16,
        /// Description of the rejected request
        message: String,
    },

    /// Response was blocked by safety/policy filtering
    #[error("Content blocked: {0}")]
    BlockedContent(String),

    /// Error event received mid-stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Tool-call recursion guard tripped
    #[error("Tool-call loop exceeded maximum of {limit} iterations")]
    LoopLimitExceeded {
        /// The configured iteration limit
        limit: u32,
    },

    /// The active turn was cancelled by the caller
    #[error("Turn cancelled")]
    Cancelled,

    /// A turn is already in flight for this conversation
    #[error("A turn is already in progress; cancel it first")]
    TurnInProgress,

    /// Attachment exceeds the configured size limit
    #[error("Attachment '{name}' is {size} bytes, limit is {limit}")]
    AttachmentTooLarge {
        /// Attachment file name
        name: String,
        /// Actual size in bytes
        size: usize,
        /// Configured maximum in bytes
        limit: usize,
    },

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transcript export/import errors
    #[error("Transcript error: {0}")]
    Transcript(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Returns true for failures worth another attempt: network-level
    /// failures and server errors. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network(_) | EngineError::Server { .. })
    }

    /// Returns true when this error is the cooperative cancellation signal.
    ///
    /// Cancellation is terminal but must not be recorded as an error
    /// message, so callers check it separately.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// Builds an error from an HTTP-equivalent status hint.
    ///
    /// 5xx maps to `Server`, everything else to `Client`. Transports that
    /// failed before obtaining a status use `Network` directly.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if (500..600).contains(&status) {
            EngineError::Server {
                status,
                message: message.into(),
            }
        } else {
            EngineError::Client {
                status,
                message: message.into(),
            }
        }
    }
}

/// Result type alias for Palaver operations
///
/// Uses `anyhow::Error` as the error type for rich context and easy
/// propagation; classification downcasts to [`EngineError`].
pub type Result<T> = anyhow::Result<T>;

/// Returns true when an `anyhow` chain bottoms out in [`EngineError::Cancelled`].
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<EngineError>()
        .map(EngineError::is_cancelled)
        .unwrap_or(false)
}
