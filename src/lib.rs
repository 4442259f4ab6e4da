//! Palaver - Conversational session engine library
//!
//! This library provides a client-side engine for persisted, branchable
//! conversations with a generative text API: the turn loop with retry and
//! streaming, tool-call dispatch, cascade (sibling) branch management,
//! SQLite-backed persistence, and plain-text transcript export/import.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Conversation model, turn-loop controller, retry, streaming, branching
//! - `client`: API client contract (request/response/stream-event shapes)
//! - `tools`: Tool capability registry and concurrent call dispatch
//! - `storage`: SQLite-backed conversation store
//! - `transcript`: Plain-text export/import
//! - `config`: Engine configuration and validation
//! - `error`: Error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use palaver::{EngineConfig, NullObserver, SessionController, ToolRegistry};
//! use palaver::storage::ConversationStore;
//! use std::sync::Arc;
//!
//! # async fn run(client: Arc<dyn palaver::ApiClient>) -> anyhow::Result<()> {
//! let store = ConversationStore::new()?;
//! let mut controller = SessionController::new(
//!     client,
//!     store,
//!     Arc::new(ToolRegistry::new()),
//!     EngineConfig::default(),
//! )?;
//! controller
//!     .send_message("Hello", Vec::new(), &mut NullObserver)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod tools;
pub mod transcript;

// Re-export commonly used types
pub use client::{
    event_channel, ApiClient, ApiRequest, ApiResponse, EventStream, GenerationParams, StreamEvent,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use session::{
    Attachment, Conversation, Direction, Message, NullObserver, SessionController, SessionState,
    StreamObserver,
};
pub use storage::ConversationStore;
pub use tools::{ToolCallDispatcher, ToolHandler, ToolRegistry};
