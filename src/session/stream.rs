//! Streamed response assembly
//!
//! Accumulates a lazily-pulled event sequence into content and
//! thought-summary buffers plus a tool-call list. Consumers re-render whole
//! buffers, so every delta notification carries the current full buffer
//! rather than the fragment. A mid-stream error aborts assembly; the caller
//! treats it like a failed call. Cancellation is checked at every pull.

use crate::client::{EventStream, ResponseMetadata, StreamEvent, ToolCall};
use crate::error::{EngineError, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rendering collaborator notified as buffers grow
///
/// Both hooks receive the full buffer accumulated so far.
pub trait StreamObserver: Send {
    /// Content buffer changed
    fn on_content(&mut self, _content: &str) {}

    /// Thought-summary buffer changed
    fn on_thought(&mut self, _thought: &str) {}
}

/// Observer that ignores all notifications
pub struct NullObserver;

impl StreamObserver for NullObserver {}

/// The finalized output of one streamed response
#[derive(Debug, Clone, Default)]
pub struct AssembledResponse {
    /// Primary response text
    pub content: String,
    /// Thought-summary text, if any was streamed
    pub thought_summary: Option<String>,
    /// Accumulated tool calls in arrival order
    pub tool_calls: Vec<ToolCall>,
    /// Merged metadata fragments
    pub metadata: ResponseMetadata,
}

/// Incremental accumulator for one streamed response
///
/// One assembler is created per response; finalization consumes it, so
/// buffers cannot leak into the next turn.
#[derive(Default)]
pub struct StreamAssembler {
    content: String,
    thought: String,
    tool_calls: Vec<ToolCall>,
    metadata: ResponseMetadata,
}

impl StreamAssembler {
    /// A fresh assembler with empty buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Drives the stream to completion and finalizes the buffers
    ///
    /// # Errors
    ///
    /// - `EngineError::Cancelled` if the token fires at any pull
    /// - `EngineError::Stream` for an error event mid-stream (cancellation
    ///   surfaced by the stream itself is kept distinguishable)
    pub async fn assemble(
        mut self,
        mut stream: EventStream,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<AssembledResponse> {
        loop {
            // Biased so a fired token always wins over a ready event
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled.into()),
                item = stream.next() => item,
            };

            match item {
                None => break,
                Some(Err(err)) => {
                    if crate::error::is_cancellation(&err) {
                        return Err(err);
                    }
                    return Err(EngineError::Stream(err.to_string()).into());
                }
                Some(Ok(event)) => self.apply(event, observer),
            }
        }

        debug!(
            content_len = self.content.len(),
            thought_len = self.thought.len(),
            tool_calls = self.tool_calls.len(),
            "stream assembly complete"
        );
        Ok(self.finalize())
    }

    fn apply(&mut self, event: StreamEvent, observer: &mut dyn StreamObserver) {
        match event {
            StreamEvent::ContentDelta(delta) => {
                self.content.push_str(&delta);
                observer.on_content(&self.content);
            }
            StreamEvent::ThoughtDelta(delta) => {
                self.thought.push_str(&delta);
                observer.on_thought(&self.thought);
            }
            StreamEvent::ToolCallDelta(calls) => {
                self.tool_calls.extend(calls);
            }
            StreamEvent::Metadata(fragment) => {
                self.metadata.merge(fragment);
            }
        }
    }

    fn finalize(self) -> AssembledResponse {
        AssembledResponse {
            content: self.content,
            thought_summary: if self.thought.is_empty() {
                None
            } else {
                Some(self.thought)
            },
            tool_calls: self.tool_calls,
            metadata: self.metadata,
        }
    }
}
