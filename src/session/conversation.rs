//! Conversation data model
//!
//! Defines the persisted record shape: a conversation owns an append-ordered
//! list of role-tagged messages. Messages are never mutated after
//! finalization except for cascade selection flags; role-specific fields
//! serialize only when meaningful so stored records stay minimal.

use crate::client::{ResponseMetadata, ToolCall};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// A file attached to a user message, already base64-encoded by the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    /// Original file name
    pub name: String,
    /// MIME type
    pub mime_type: String,
    /// Base64-encoded file contents
    pub data: String,
    /// Decoded size in bytes
    pub size: usize,
}

impl Attachment {
    /// Builds an attachment from raw bytes, base64-encoding the payload
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: BASE64_STANDARD.encode(bytes),
            size: bytes.len(),
        }
    }

    /// Checks a batch of attachments against the configured per-file and
    /// per-message caps. Runs before any network call.
    pub fn validate_batch(attachments: &[Attachment], config: &EngineConfig) -> Result<()> {
        let mut total = 0usize;
        for attachment in attachments {
            if attachment.size > config.max_attachment_bytes {
                return Err(EngineError::AttachmentTooLarge {
                    name: attachment.name.clone(),
                    size: attachment.size,
                    limit: config.max_attachment_bytes,
                }
                .into());
            }
            total += attachment.size;
        }
        if total > config.max_total_attachment_bytes {
            return Err(EngineError::AttachmentTooLarge {
                name: "(combined)".to_string(),
                size: total,
                limit: config.max_total_attachment_bytes,
            }
            .into());
        }
        Ok(())
    }
}

/// A user turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    /// Text content, may be empty when only attachments are sent
    #[serde(default)]
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Attached files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// A model completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Primary response text
    #[serde(default)]
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Auxiliary reasoning text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_summary: Option<String>,
    /// Tool calls this completion requested, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Finish reason, safety ratings, usage, grounding
    #[serde(flatten)]
    pub metadata: ResponseMetadata,
    /// Failed attempts consumed before this completion succeeded
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
    /// Whether this completion belongs to a cascade group
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_cascaded: bool,
    /// Whether this is the selected member of its group
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_selected: bool,
    /// Cascade group id, present only for cascaded completions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sibling_group_id: Option<String>,
}

impl ModelMessage {
    /// A fresh completion with content only
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: now_millis(),
            thought_summary: None,
            tool_calls: None,
            metadata: ResponseMetadata::default(),
            retry_count: 0,
            is_cascaded: false,
            is_selected: false,
            sibling_group_id: None,
        }
    }

    /// True when this completion carries pending tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|calls| !calls.is_empty())
            .unwrap_or(false)
    }
}

/// A tool result, protocol-internal (not rendered as a conversation turn)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMessage {
    /// Function name this result belongs to
    pub name: String,
    /// Structured result payload, opaque to the engine
    pub response: serde_json::Value,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// A recorded terminal failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMessage {
    /// Human-readable failure description
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// A role-tagged conversation entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    /// User input with optional attachments
    User(UserMessage),
    /// Model completion
    Model(ModelMessage),
    /// Tool result
    Tool(ToolMessage),
    /// Terminal failure recorded in the log
    Error(ErrorMessage),
}

impl Message {
    /// A user message with the current timestamp
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Message::User(UserMessage {
            content: content.into(),
            timestamp: now_millis(),
            attachments,
        })
    }

    /// A model message with content only
    pub fn model(content: impl Into<String>) -> Self {
        Message::Model(ModelMessage::new(content))
    }

    /// A tool-result message
    pub fn tool(name: impl Into<String>, response: serde_json::Value) -> Self {
        Message::Tool(ToolMessage {
            name: name.into(),
            response,
            timestamp: now_millis(),
        })
    }

    /// An error message recording a terminal failure
    pub fn error(content: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            content: content.into(),
            timestamp: now_millis(),
        })
    }

    /// Role tag as used in request payloads and transcripts
    pub fn role(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Model(_) => "model",
            Message::Tool(_) => "tool",
            Message::Error(_) => "error",
        }
    }

    /// Text content; empty for tool messages
    pub fn content(&self) -> &str {
        match self {
            Message::User(m) => &m.content,
            Message::Model(m) => &m.content,
            Message::Tool(_) => "",
            Message::Error(m) => &m.content,
        }
    }

    /// Message timestamp in epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        match self {
            Message::User(m) => m.timestamp,
            Message::Model(m) => m.timestamp,
            Message::Tool(m) => m.timestamp,
            Message::Error(m) => m.timestamp,
        }
    }

    /// Borrow as a model message, if that is the role
    pub fn as_model(&self) -> Option<&ModelMessage> {
        match self {
            Message::Model(m) => Some(m),
            _ => None,
        }
    }

    /// Mutably borrow as a model message, if that is the role
    pub fn as_model_mut(&mut self) -> Option<&mut ModelMessage> {
        match self {
            Message::Model(m) => Some(m),
            _ => None,
        }
    }
}

/// A persisted conversation record
///
/// Owned by the store; the session controller holds a working copy for the
/// active conversation and writes it back after every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-assigned id; `None` until first saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display title; derived from the first user message when empty
    #[serde(default)]
    pub title: String,
    /// System prompt forwarded as the request's system instruction
    #[serde(default)]
    pub system_prompt: String,
    /// Opaque per-conversation key/value payload, carried but not interpreted
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub persistent_memory: serde_json::Map<String, serde_json::Value>,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Last-update time, epoch milliseconds
    pub updated_at: i64,
    /// Append-ordered message log
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// An empty, unsaved conversation
    pub fn new() -> Self {
        let now = now_millis();
        Self {
            id: None,
            title: String::new(),
            system_prompt: String::new(),
            persistent_memory: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Bumps the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Title to persist: the explicit title, else the first user message's
    /// leading substring, else a placeholder.
    pub fn effective_title(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        for message in &self.messages {
            if let Message::User(user) = message {
                let trimmed = user.content.trim();
                if !trimmed.is_empty() {
                    let head: String = trimmed.chars().take(48).collect();
                    return head;
                }
            }
        }
        "New conversation".to_string()
    }

    /// Index of the user message that anchors the turn containing
    /// `message_index`, scanning backwards. `None` when the conversation is
    /// empty or no user message precedes the index.
    pub fn anchor_user_index(&self, message_index: usize) -> Option<usize> {
        let end = message_index.min(self.messages.len().checked_sub(1)?);
        self.messages[..=end]
            .iter()
            .rposition(|m| matches!(m, Message::User(_)))
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
