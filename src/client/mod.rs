//! API client contract
//!
//! The engine never talks to the network itself. The embedding application
//! supplies an [`ApiClient`] implementation; this module defines the request
//! payload the engine builds from conversation state, the single-shot
//! response shape, and the stream-event sequence consumed by the assembler.
//!
//! Failures surfaced by a client implementation should be [`EngineError`]
//! values (`Network`, or `from_status` for HTTP-equivalent statuses) so the
//! retry policy can classify them.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One part of a role-tagged message payload
///
/// User messages produce text and inline-data parts; a model message with
/// pending tool calls produces function-call parts; tool messages produce
/// function-response parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    /// Plain text
    Text {
        /// The text content
        text: String,
    },
    /// Auxiliary reasoning text (responses only, never sent in requests)
    Thought {
        /// The thought-summary text
        text: String,
    },
    /// Base64-encoded inline attachment data
    InlineData {
        /// MIME type of the payload
        mime_type: String,
        /// Base64-encoded bytes
        data: String,
    },
    /// A function call requested by the model
    FunctionCall {
        /// Function name
        name: String,
        /// Structured argument payload
        args: serde_json::Value,
    },
    /// The result of a previously requested function call
    FunctionResponse {
        /// Function name the result belongs to
        name: String,
        /// Structured result payload
        response: serde_json::Value,
    },
}

/// A role-tagged ordered list of parts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    /// Message role: "user", "model", or "tool"
    pub role: String,
    /// Ordered message parts
    pub parts: Vec<Part>,
}

/// A single tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Name of the function to invoke
    pub name: String,
    /// Structured argument payload
    pub args: serde_json::Value,
}

/// Tunable decoding settings
///
/// Every field is optional; unset fields are omitted from the request
/// payload rather than defaulted, so the API's own defaults apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling cutoff
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Maximum output length in tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerationParams {
    /// Returns true when no parameter is set
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.max_output_tokens.is_none()
    }
}

/// Request payload built from conversation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Full message history as role-tagged part lists
    pub contents: Vec<Content>,

    /// Decoding parameters, present only when at least one field is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationParams>,

    /// Optional system instruction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Function-declaration schemas for the tools available this turn
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<serde_json::Value>,
}

/// Token accounting reported by the API
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageMetadata {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens produced by the completion
    pub completion_tokens: u32,
    /// Total tokens for the exchange
    pub total_tokens: u32,
}

/// Response metadata merged onto the finalized model message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Why generation stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Safety ratings, opaque to the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_ratings: Option<serde_json::Value>,

    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetadata>,

    /// Grounding metadata, opaque to the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding: Option<serde_json::Value>,
}

impl ResponseMetadata {
    /// Merges another metadata fragment onto this one; later fragments win
    /// field by field, never clearing an already-set value with `None`.
    pub fn merge(&mut self, other: ResponseMetadata) {
        if other.finish_reason.is_some() {
            self.finish_reason = other.finish_reason;
        }
        if other.safety_ratings.is_some() {
            self.safety_ratings = other.safety_ratings;
        }
        if other.usage.is_some() {
            self.usage = other.usage;
        }
        if other.grounding.is_some() {
            self.grounding = other.grounding;
        }
    }
}

/// One candidate completion in a single-shot response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Ordered response parts
    pub parts: Vec<Part>,
    /// Response metadata
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl Candidate {
    /// Concatenated text of all plain-text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text of all thought parts, if any
    pub fn thought(&self) -> Option<String> {
        let thought: String = self
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Thought { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if thought.is_empty() {
            None
        } else {
            Some(thought)
        }
    }

    /// Tool calls extracted from function-call parts, in part order
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args } => Some(ToolCall {
                    name: name.clone(),
                    args: args.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// A single-shot (non-streaming) response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Candidate completions; the engine uses the first
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    /// Block reason reported when no candidate was produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

/// One event pulled from a streamed response
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of primary response text
    ContentDelta(String),
    /// A fragment of thought-summary text
    ThoughtDelta(String),
    /// Zero or more tool-call fragments
    ToolCallDelta(Vec<ToolCall>),
    /// Metadata fragment (finish reason, safety, usage, grounding)
    Metadata(ResponseMetadata),
}

/// Lazily-pulled, finite, ordered sequence of stream events
///
/// A mid-stream failure is carried as an `Err` item and terminates the
/// sequence.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Builds an [`EventStream`] fed from a channel
///
/// Convenience for client implementations whose transport pushes events
/// from a background task: push into the returned sender, hand the stream
/// to the engine. Dropping the sender ends the stream.
pub fn event_channel(buffer: usize) -> (mpsc::Sender<Result<StreamEvent>>, EventStream) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, Box::pin(ReceiverStream::new(rx)))
}

/// The generative text API, as seen by the engine
///
/// Implementations own transport, authentication, and wire encoding.
/// Errors should be [`crate::error::EngineError`] values so retry
/// classification works; anything else is treated as terminal.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Requests a single complete response
    async fn generate(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Requests a streamed response
    async fn generate_stream(&self, request: ApiRequest) -> Result<EventStream>;
}
