//! Session module for Palaver
//!
//! This module contains the core session logic: the conversation data model,
//! the turn-loop controller, retry/backoff, stream assembly, and cascade
//! branch management.

pub mod branch;
pub mod controller;
pub mod conversation;
pub mod retry;
pub mod stream;

pub use branch::{BranchManager, Direction};
pub use controller::{SessionController, SessionState};
pub use conversation::{Attachment, Conversation, Message, ModelMessage};
pub use retry::{ErrorClass, RetryPolicy};
pub use stream::{AssembledResponse, NullObserver, StreamAssembler, StreamObserver};
